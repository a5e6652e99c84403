#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod args;
mod error;
mod gesture;
mod model_download;
mod pipeline;
mod render_loop;
mod scene;
mod types;
mod ui;

use anyhow::Result;
use clap::Parser;
use gpui::Application;

use crate::args::Args;

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    if args.list_cameras {
        let cameras = pipeline::available_cameras()?;
        if cameras.is_empty() {
            println!("No cameras found.");
            log::info!("no cameras found");
        }
        for camera in cameras {
            println!("{camera}");
            log::info!("camera {camera}");
        }
        return Ok(());
    }

    let launch = ui::LaunchOptions {
        config: args.loop_config(),
        models_dir: args.models_dir.clone(),
        min_confidence: args.min_confidence,
    };

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, launch) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
