use std::fmt;

use crate::{error::SetupError, types::Frame};

#[cfg(feature = "camera-nokhwa")]
pub use self::nokhwa_source::{CameraFrameSource, available_cameras};

#[cfg(feature = "camera-nokhwa")]
pub type DefaultFrameSource = CameraFrameSource;
#[cfg(not(feature = "camera-nokhwa"))]
pub type DefaultFrameSource = UnavailableFrameSource;

pub const DEFAULT_CAPTURE_SIZE: (u32, u32) = (640, 480);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConstraints {
    pub index: u32,
    /// Preferred capture size; the closest mode the device offers is used.
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<u32>,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            index: 0,
            resolution: Some(DEFAULT_CAPTURE_SIZE),
            frame_rate: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: u32,
    pub label: String,
}

impl fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.label)
    }
}

/// Where the render loop pulls video frames from.
///
/// `acquire` runs once before the first tick; `current_frame` once per tick.
pub trait FrameSource {
    fn acquire(&mut self, constraints: &CameraConstraints) -> Result<(), SetupError>;
    fn current_frame(&mut self) -> anyhow::Result<Frame>;
}

/// Stand-in used when the binary is built without camera support.
#[derive(Debug, Default)]
#[cfg_attr(feature = "camera-nokhwa", allow(dead_code))]
pub struct UnavailableFrameSource;

#[cfg_attr(feature = "camera-nokhwa", allow(dead_code))]
impl UnavailableFrameSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for UnavailableFrameSource {
    fn acquire(&mut self, _constraints: &CameraConstraints) -> Result<(), SetupError> {
        Err(SetupError::DeviceUnavailable(
            "built without the camera-nokhwa feature".to_string(),
        ))
    }

    fn current_frame(&mut self) -> anyhow::Result<Frame> {
        Err(anyhow::anyhow!("no camera backend compiled in"))
    }
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn available_cameras() -> anyhow::Result<Vec<CameraDevice>> {
    Ok(Vec::new())
}

/// Sorts a camera open failure into the setup taxonomy by its message; the
/// native backends only report permission problems as text.
pub(crate) fn classify_open_error(message: String) -> SetupError {
    let lower = message.to_lowercase();
    let permission_markers = ["permission", "denied", "not authorized", "unauthorized"];
    if permission_markers.iter().any(|m| lower.contains(m)) {
        SetupError::PermissionDenied(message)
    } else {
        SetupError::DeviceUnavailable(message)
    }
}

#[cfg(feature = "camera-nokhwa")]
mod nokhwa_source {
    use std::time::Duration;

    use anyhow::Context;
    use nokhwa::{
        Camera, NokhwaError,
        pixel_format::RgbFormat,
        query,
        utils::{
            ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
            RequestedFormatType, Resolution,
        },
    };

    use super::{CameraConstraints, CameraDevice, FrameSource, classify_open_error};
    use crate::{error::SetupError, pipeline::rgba_converter, types::Frame};

    const PERMISSION_TIMEOUT: Duration = Duration::from_secs(60);
    const DEFAULT_FRAME_RATE: u32 = 30;

    // Prefer pixel formats that are widely supported on macOS (the built-in
    // cameras often reject YUYV even though nokhwa reports it).
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::GRAY,
        FrameFormat::YUYV,
        FrameFormat::NV12,
        FrameFormat::MJPEG,
    ];

    pub fn available_cameras() -> anyhow::Result<Vec<CameraDevice>> {
        let cameras = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
        Ok(cameras
            .into_iter()
            .filter_map(|info| match info.index() {
                CameraIndex::Index(index) => Some(CameraDevice {
                    index: *index,
                    label: info.human_name(),
                }),
                CameraIndex::String(_) => None,
            })
            .collect())
    }

    /// nokhwa-backed webcam. The camera handle is not `Send`, so it is opened
    /// on whichever thread calls `acquire`.
    #[derive(Default)]
    pub struct CameraFrameSource {
        camera: Option<Camera>,
    }

    impl CameraFrameSource {
        pub fn new() -> Self {
            Self { camera: None }
        }
    }

    impl FrameSource for CameraFrameSource {
        fn acquire(&mut self, constraints: &CameraConstraints) -> Result<(), SetupError> {
            ensure_authorized()?;

            let devices = available_cameras()
                .map_err(|err| SetupError::DeviceUnavailable(format!("{err:#}")))?;
            let Some(device) = devices.iter().find(|d| d.index == constraints.index) else {
                return Err(SetupError::DeviceUnavailable(format!(
                    "no camera at index {} ({} found)",
                    constraints.index,
                    devices.len()
                )));
            };

            let camera = open_camera(CameraIndex::Index(device.index), constraints)?;
            let format = camera.camera_format();
            log::info!(
                "camera \"{}\" streaming {}x{} {:?} @ {} fps",
                device.label,
                format.resolution().width(),
                format.resolution().height(),
                format.format(),
                format.frame_rate()
            );
            self.camera = Some(camera);
            Ok(())
        }

        fn current_frame(&mut self) -> anyhow::Result<Frame> {
            let camera = self
                .camera
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("camera has not been acquired"))?;
            let buffer = camera.frame().context("camera frame read failed")?;
            let converted = rgba_converter::convert_camera_frame(&buffer)?;
            Ok(Frame::new(converted.rgba, converted.width, converted.height))
        }
    }

    impl Drop for CameraFrameSource {
        fn drop(&mut self) {
            if let Some(camera) = self.camera.as_mut() {
                if let Err(err) = camera.stop_stream() {
                    log::warn!("failed to stop camera stream: {err}");
                }
            }
        }
    }

    fn ensure_authorized() -> Result<(), SetupError> {
        if nokhwa::nokhwa_check() {
            return Ok(());
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        nokhwa::nokhwa_initialize(move |granted| {
            let _ = tx.send(granted);
        });
        match rx.recv_timeout(PERMISSION_TIMEOUT) {
            Ok(true) => Ok(()),
            Ok(false) => Err(SetupError::PermissionDenied(
                "the operating system refused camera access".to_string(),
            )),
            Err(_) => Err(SetupError::PermissionDenied(
                "timed out waiting for camera authorization".to_string(),
            )),
        }
    }

    fn requested_formats(constraints: &CameraConstraints) -> Vec<RequestedFormat<'static>> {
        let mut formats = Vec::with_capacity(4);
        if let Some((width, height)) = constraints.resolution {
            let wanted = CameraFormat::new(
                Resolution::new(width, height),
                FrameFormat::MJPEG,
                constraints.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
            );
            formats.push(RequestedFormat::with_formats(
                RequestedFormatType::Closest(wanted),
                PREFERRED_PIXEL_FORMATS,
            ));
        }
        if let Some(rate) = constraints.frame_rate {
            formats.push(RequestedFormat::with_formats(
                RequestedFormatType::HighestFrameRate(rate),
                PREFERRED_PIXEL_FORMATS,
            ));
        }
        formats.push(RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ));
        // Any format nokhwa can decode.
        formats.push(RequestedFormat::new::<RgbFormat>(RequestedFormatType::None));
        formats
    }

    fn open_camera(index: CameraIndex, constraints: &CameraConstraints) -> Result<Camera, SetupError> {
        let mut last_err: Option<NokhwaError> = None;

        for requested in requested_formats(constraints) {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err),
                },
                Err(err) => last_err = Some(err),
            }
        }

        let message = last_err
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no requested format could be satisfied".to_string());
        log::error!("failed to open camera {index}: {message}");
        Err(classify_open_error(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_device_lists_as_index_and_label() {
        let device = CameraDevice {
            index: 1,
            label: "FaceTime HD Camera".into(),
        };
        assert_eq!(device.to_string(), "1: FaceTime HD Camera");
    }

    #[test]
    fn permission_messages_map_to_permission_denied() {
        assert!(matches!(
            classify_open_error("Could not open device: Permission denied (os error 13)".into()),
            SetupError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_open_error("AVFoundation: not authorized".into()),
            SetupError::PermissionDenied(_)
        ));
    }

    #[test]
    fn other_messages_map_to_device_unavailable() {
        assert!(matches!(
            classify_open_error("Could not find device /dev/video3".into()),
            SetupError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn unavailable_source_never_acquires() {
        let mut source = UnavailableFrameSource::new();
        let err = source.acquire(&CameraConstraints::default()).unwrap_err();
        assert!(matches!(err, SetupError::DeviceUnavailable(_)));
        assert!(source.current_frame().is_err());
    }
}
