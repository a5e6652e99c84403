use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::{
    model_download::DEFAULT_MODELS_DIR,
    pipeline::{CameraConstraints, DEFAULT_MIN_CONFIDENCE},
    render_loop::{DEFAULT_TICK_RATE, LoopConfig},
    types::DemoVariant,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Classify open hand / closed fist and draw landmarks
    Gesture,
    /// Move and rotate a 3D cube with the index fingertip
    Cube,
}

impl From<Demo> for DemoVariant {
    fn from(demo: Demo) -> Self {
        match demo {
            Demo::Gesture => DemoVariant::Gesture,
            Demo::Cube => DemoVariant::Cube,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Which demo to run
    #[arg(short, long, value_enum, default_value_t = Demo::Gesture)]
    pub demo: Demo,

    /// Camera Index (default 0)
    #[arg(short, long, default_value_t = 0)]
    pub camera: u32,

    /// Requested capture width
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Requested capture height
    #[arg(long, default_value_t = 480)]
    pub height: u32,

    /// Render loop rate in ticks per second
    #[arg(long, default_value_t = DEFAULT_TICK_RATE, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub fps: u32,

    /// Minimum hand confidence (0.0 - 1.0)
    #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE, value_parser = parse_confidence)]
    pub min_confidence: f32,

    /// Directory holding (or receiving) the ONNX models
    #[arg(long, default_value = DEFAULT_MODELS_DIR)]
    pub models_dir: PathBuf,

    /// List available cameras
    #[arg(long)]
    pub list_cameras: bool,
}

fn parse_confidence(raw: &str) -> Result<f32, String> {
    let value: f32 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0.0..=1.0"))
    }
}

impl Args {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            variant: self.demo.into(),
            constraints: CameraConstraints {
                index: self.camera,
                resolution: Some((self.width, self.height)),
                frame_rate: Some(self.fps),
            },
            tick_interval: LoopConfig::tick_interval_for(self.fps),
        }
    }
}
