use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use kineticoach::app::App;
use kineticoach::camera::{SourceRequest, StillBackend};
use kineticoach::config::Config;
use kineticoach::connection::ConnectionState;
use kineticoach::feedback;
use kineticoach::logging;

const CONFIG_PATH: &str = "kineticoach.toml";
const DEFAULT_CYCLES: u64 = 10;
const TIMEOUT: Duration = Duration::from_secs(30);

struct ProbeArgs {
    cycles: u64,
    image: Option<PathBuf>,
}

fn parse_args() -> Result<ProbeArgs> {
    // Usage: ws_probe [cycles] [image]
    // e.g.  ws_probe 20 squat.jpg
    let args: Vec<String> = std::env::args().collect();
    let cycles = match args.get(1) {
        Some(s) => s.parse().with_context(|| format!("cycles must be a number, got {s:?}"))?,
        None => DEFAULT_CYCLES,
    };
    Ok(ProbeArgs {
        cycles,
        image: args.get(2).map(PathBuf::from),
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let config = Config::load_or_default(CONFIG_PATH)?;
    config.validate()?;
    logging::init(config.verbose, "probe")?;
    info!("ws_probe {} -> {}", env!("CARGO_PKG_VERSION"), config.endpoint()?);

    let (media_tx, mut media_rx) = mpsc::unbounded_channel();
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
    let backend = StillBackend::blank(config.camera.width, config.camera.height);
    let mut app = App::from_config(&config, Box::new(backend), media_tx, conn_tx);

    let request = match args.image {
        Some(path) => SourceRequest::File(path),
        None => SourceRequest::Camera,
    };
    app.activate_source(request)?;
    app.connect()?;

    let mut last_feedback = 0;
    let mut end_sent = false;
    let deadline = tokio::time::sleep(TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(event) = media_rx.recv() => app.handle_media_event(event),
            Some(event) = conn_rx.recv() => {
                app.handle_connection_event(event);

                let model = app.model();
                if model.feedback_count != last_feedback {
                    last_feedback = model.feedback_count;
                    if let Some(payload) = &model.feedback {
                        let line = feedback::latest_feedback(payload).map(|l| l.message).unwrap_or_default();
                        println!(
                            "[{:>3}] reps={} landmarks={} {} {}",
                            last_feedback,
                            payload.rep_count,
                            payload.landmarks().len(),
                            feedback::debug_readout(payload),
                            line
                        );
                    }
                }

                if let Some(report) = &model.report {
                    println!("{}", feedback::report_summary(report));
                    break;
                }
                if !end_sent && last_feedback >= args.cycles {
                    end_sent = app.end_session()?;
                }
                if app.connection_state() == Some(ConnectionState::Closed) {
                    if let Some(notice) = &app.model().notice {
                        warn!("{notice}");
                    }
                    bail!("connection closed before a report arrived");
                }
            }
            _ = &mut deadline => bail!("no report within {}s", TIMEOUT.as_secs()),
        }
    }

    let stats = app.stream_stats();
    info!(
        "sent {} frames, {} KiB, last encode {:.1} ms",
        stats.frames_sent,
        stats.bytes_sent / 1024,
        stats.last_encode.as_secs_f64() * 1000.0
    );
    app.shutdown();
    Ok(())
}
