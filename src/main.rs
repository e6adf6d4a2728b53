mod app;
mod color;
mod config;
mod data;
mod error;
mod export;
mod fit;
mod panel;
mod state;
mod tree;
mod ui;
mod view;

use std::path::PathBuf;

use app::XpsViewApp;
use config::ViewerConfig;
use eframe::egui;
use state::AppState;

fn main() -> eframe::Result {
    env_logger::init();

    let config = ViewerConfig::load();
    let mut state = AppState::new(config.clone());

    // Archive from the command line, else the configured default.
    let initial = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.default_archive.clone());
    if let Some(path) = initial {
        if let Err(e) = state.load(&path) {
            log::error!("Failed to load {}: {e:#}", path.display());
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(config.window_size)
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "XPS View",
        options,
        Box::new(|_cc| Ok(Box::new(XpsViewApp::new(state)))),
    )
}
