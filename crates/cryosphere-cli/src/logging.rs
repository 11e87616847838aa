use crate::error::{CliError, Result};
use cryosphere::workflows::evaluate::RUN_LOG_TARGET;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::{
    Layer,
    filter::{LevelFilter, Targets},
    fmt::{self},
    prelude::*,
    registry::LookupSpan,
};

fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Destination of the run summary events, attached once the results directory is known.
///
/// Events arriving before [`RunLogSink::attach`] are discarded.
#[derive(Clone, Default)]
pub struct RunLogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLogSink {
    pub fn attach(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut slot = self
            .file
            .lock()
            .map_err(|_| CliError::Other(anyhow::anyhow!("run log lock poisoned")))?;
        *slot = Some(file);
        Ok(())
    }
}

impl Write for RunLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(file) => file.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Err(io::Error::other("run log lock poisoned")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock() {
            Ok(mut slot) => slot.as_mut().map_or(Ok(()), |file| file.flush()),
            Err(_) => Err(io::Error::other("run log lock poisoned")),
        }
    }
}

/// Timestamp-free layer writing the run summary events, whatever the console verbosity.
fn run_log_layer<S>(sink: &RunLogSink) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let sink = sink.clone();
    fmt::layer()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .with_filter(Targets::new().with_target(RUN_LOG_TARGET, LevelFilter::INFO))
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<RunLogSink> {
    let level = level_filter(verbosity, quiet);
    let run_log = RunLogSink::default();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(level);

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_filter(level),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(run_log_layer(&run_log))
        .init();

    Ok(run_log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use tracing::{debug, error, info, trace, warn};

    static INIT: Once = Once::new();

    fn ensure_global_logger_is_set() {
        INIT.call_once(|| {
            setup_logging(3, false, None).expect("Failed to set up global logger for tests");
        });
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::OFF);
    }

    #[test]
    #[serial]
    fn initialization_and_macros_work() {
        ensure_global_logger_is_set();

        error!("This is an error");
        warn!("This is a warning");
        info!(epoch = 0, "This is info");
        debug!("This is debug");
        trace!("This is trace");
    }

    #[test]
    #[serial]
    fn file_layer_captures_events() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("test.log");

        let file = File::create(&log_path).unwrap();
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true);
        let subscriber = tracing_subscriber::registry().with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            debug!("Message for file-only test.");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Message for file-only test."));
        assert!(content.contains("DEBUG"));
        assert!(content.contains("ThreadId"));
    }

    #[test]
    #[serial]
    fn run_log_receives_only_summary_events_once_attached() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("run.log");
        let sink = RunLogSink::default();
        let subscriber = tracing_subscriber::registry().with(run_log_layer(&sink));

        tracing::subscriber::with_default(subscriber, || {
            info!(target: RUN_LOG_TARGET, "Dropped before attaching.");
            sink.attach(&log_path).unwrap();
            info!(target: RUN_LOG_TARGET, "Epoch: 0 || Total: 1.5");
            info!("Console-only message.");
            debug!(target: RUN_LOG_TARGET, "Too detailed for the run log.");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].ends_with("Epoch: 0 || Total: 1.5"));
    }

    #[test]
    #[serial]
    fn unwritable_log_file_propagates_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = setup_logging(0, false, Some(temp_dir.path()));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
