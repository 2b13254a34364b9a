//! Scraper Panel - egui desktop application
//!
//! Build with the GUI enabled:
//! ```bash
//! cargo run --features gui_egui --bin scraper_panel_gui -- --scraper LT02-SCRH
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use eframe::egui;
use scraper_panel::{config::PanelConfig, gui::ScraperPanelApp, logging};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "scraper_panel_gui", version, about = "Scraper panel window")]
struct Args {
    /// Configuration file layered over the built-in installation table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scraper installation to open; omit to choose in the window
    scraper: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PanelConfig::load(args.config.as_deref()).context("loading configuration")?;
    logging::init(&config.application.log_level)?;

    tracing::info!("Starting {}", config.application.name);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let name = config.application.name.clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([650.0, 500.0])
            .with_title(name.clone()),
        ..Default::default()
    };

    eframe::run_native(
        &name,
        options,
        Box::new(move |_cc| {
            Ok(Box::new(ScraperPanelApp::new(
                config,
                runtime,
                args.scraper.as_deref(),
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {e}"))
}
