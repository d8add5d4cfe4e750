//! Logging setup
//!
//! Two `tracing-subscriber` layers:
//! - console (stderr), filtered by `RUST_LOG`, `warn` by default so the
//!   colored status lines stay readable
//! - transcript file, `info` and above, one timestamped file per run, append
//!   only and without ANSI codes

use crate::error::{ProvisionError, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// File name for a transcript started at `now`
pub fn transcript_file_name(now: OffsetDateTime) -> String {
    let stamp = now
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("deskstrap-{}.log", stamp)
}

/// Local time when the offset is known, UTC otherwise
fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Create the transcript file in `dir`
pub fn open_transcript(dir: &Path) -> Result<(PathBuf, fs::File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(transcript_file_name(now()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

/// Install the global subscriber.
///
/// Must be called before any other thread is spawned, because the local UTC
/// offset can only be read while the process is single-threaded. Returns the
/// transcript path when `transcript_dir` is given.
pub fn init_logging(transcript_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (transcript, path) = match transcript_dir {
        Some(dir) => {
            let (path, file) = open_transcript(dir)?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::INFO);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(transcript)
        .try_init()
        .map_err(|e| ProvisionError::Io(std::io::Error::other(e.to_string())))?;

    Ok(path)
}
