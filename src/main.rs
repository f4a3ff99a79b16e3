use anyhow::{Context, Result};
use image::RgbImage;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use kineticoach::app::App;
use kineticoach::camera::{OpenCvBackend, SourceRequest};
use kineticoach::config::Config;
use kineticoach::feedback;
use kineticoach::logging;
use kineticoach::render::{Key, OverlayWindow};
use kineticoach::streaming::Pacing;

const CONFIG_PATH: &str = "kineticoach.toml";
const REFRESH_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH)?;
    config.validate()?;
    let log_path = logging::init(config.verbose, "client")?;
    info!("KinetiCoach client {}", env!("CARGO_PKG_VERSION"));
    info!("Log: {}", log_path.display());

    let (media_tx, mut media_rx) = mpsc::unbounded_channel();
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
    let backend = OpenCvBackend::new(config.camera.index);
    let mut app = App::from_config(&config, Box::new(backend), media_tx, conn_tx);

    let mut window = OverlayWindow::new("KinetiCoach", config.window.width, config.window.height)
        .context("failed to open window")?;
    let mut surface_size = window.surface_size();
    app.resize_surface(surface_size.0, surface_size.1);

    match config.initial_source() {
        Ok(request) => {
            if let Err(e) = app.activate_source(request) {
                warn!("[main] initial source: {e}");
            }
        }
        Err(e) => error!("[main] {e}"),
    }
    // A missing endpoint is reported; the window still shows the video
    if let Err(e) = app.connect() {
        error!("[main] {e}");
    }

    // SIGUSR1 -> end session
    let end_requested = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&end_requested))?;

    let timer = match config.pacing() {
        Pacing::Timer { interval } => Some(interval),
        _ => None,
    };
    let mut pacing_tick = tokio::time::interval(timer.unwrap_or(Duration::from_secs(3600)));
    pacing_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut preview = RgbImage::new(0, 0);
    let mut title = String::new();
    let mut last_report = None;

    info!("[main] keys: E end session, C camera, F fallback file, R reconnect, Esc quit");
    loop {
        tokio::select! {
            Some(event) = media_rx.recv() => app.handle_media_event(event),
            Some(event) = conn_rx.recv() => app.handle_connection_event(event),
            _ = pacing_tick.tick(), if timer.is_some() => app.tick(),
            _ = refresh.tick() => {
                if !window.is_open() {
                    break;
                }

                if window.is_key_pressed(Key::E) || end_requested.swap(false, Ordering::Relaxed) {
                    match app.end_session() {
                        Ok(true) => {}
                        Ok(false) => warn!("[main] not connected; END_SESSION not sent"),
                        Err(e) => warn!("[main] END_SESSION: {e}"),
                    }
                }
                if window.is_key_pressed(Key::C) {
                    if let Err(e) = app.activate_source(SourceRequest::Camera) {
                        warn!("[main] camera: {e}");
                    }
                }
                if window.is_key_pressed(Key::F) {
                    if let Err(e) = app.activate_fallback() {
                        warn!("[main] fallback file: {e}");
                    }
                }
                if window.is_key_pressed(Key::R) {
                    if let Err(e) = app.reconnect() {
                        warn!("[main] reconnect: {e}");
                    }
                }

                let size = window.surface_size();
                if size != surface_size {
                    surface_size = size;
                    app.resize_surface(size.0, size.1);
                }

                let connected = app.readiness().connection_ready;
                let next_title = match &app.model().notice {
                    Some(notice) if !connected => format!("KinetiCoach [offline] {notice}"),
                    _ => feedback::status_title(app.model().feedback.as_ref(), connected),
                };
                if next_title != title {
                    window.set_title(&next_title);
                    title = next_title;
                }

                if app.model().report != last_report {
                    if let Some(report) = &app.model().report {
                        println!("{}", feedback::report_summary(report));
                    }
                    last_report = app.model().report.clone();
                }

                let has_frame = app.preview_frame(&mut preview);
                window.present(has_frame.then_some(&preview), app.overlay().surface())?;
            }
        }
    }

    app.shutdown();
    info!("[main] stopped");
    Ok(())
}
