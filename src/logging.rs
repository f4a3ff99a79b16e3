//! stderr + `logs/<prefix>_<timestamp>.log` logging through `env_logger`.

use anyhow::Result;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use env_logger::{Env, Target};
use log::LevelFilter;

/// Copies every formatted record to stderr and the session log file.
struct TeeWriter {
    file: BufWriter<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Installs the global logger and returns the log file path.
///
/// `verbose` selects debug level; `RUST_LOG` still wins when set.
pub fn init(verbose: bool, prefix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = PathBuf::from(format!("logs/{prefix}_{ts}.log"));
    let file = File::create(&path)?;

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env(Env::default())
        .target(Target::Pipe(Box::new(TeeWriter {
            file: BufWriter::new(file),
        })))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .try_init()?;

    Ok(path)
}
