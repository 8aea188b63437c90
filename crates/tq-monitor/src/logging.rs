use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tq_client::config::resolve_optional;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_LEVEL: &str = "info";

type SharedFile = Arc<Mutex<File>>;

/// Holds the log file, if any, for as long as logging is installed.
pub struct LogGuard {
    file: Option<SharedFile>,
}

/// `--debug` wins, then `TQ_LOG_LEVEL`, then `info`. A `RUST_LOG` filter
/// overrides all of them.
pub fn level(debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    resolve_optional("", "TQ_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

pub fn init_logging(debug: bool, log_dir: &str) -> Option<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level(debug)));
    let file = match log_dir.trim() {
        "" => None,
        dir => open_log_file(Path::new(dir))
            .map_err(|err| eprintln!("log_file_error: {dir}: {err}"))
            .ok(),
    };
    let shared = file.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(BoxMakeWriter::new(move || TeeWriter(shared.clone())))
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .ok()
        .map(|()| LogGuard { file })
}

/// Copies every log record to stderr and the log file. Stdout stays free for
/// progress output.
struct TeeWriter(Option<SharedFile>);

impl TeeWriter {
    fn each(&self, mut op: impl FnMut(&mut dyn Write) -> io::Result<()>) {
        let _ = op(&mut io::stderr());
        if let Some(file) = &self.0 {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = op(&mut *file);
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.each(|out| out.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.each(|out| out.flush());
        Ok(())
    }
}

/// One file per monitor process, named after its pid.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("tq-monitor-{}.log", std::process::id()))
}

fn open_log_file(log_dir: &Path) -> io::Result<SharedFile> {
    std::fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(log_dir))?;
    Ok(Arc::new(Mutex::new(file)))
}
