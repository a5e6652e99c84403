use thiserror::Error;

/// Failures that keep the render loop from ever reaching `Running`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("camera access was denied: {0}")]
    PermissionDenied(String),
    #[error("camera is unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to load the hand landmark model: {0}")]
    ModelLoad(String),
}

impl SetupError {
    pub fn notification_title(&self) -> &'static str {
        match self {
            SetupError::PermissionDenied(_) | SetupError::DeviceUnavailable(_) => {
                "Unable to access the webcam. Please ensure it is connected and permissions are granted."
            }
            SetupError::ModelLoad(_) => {
                "Failed to load the hand landmark model. Please check your internet connection."
            }
        }
    }
}
