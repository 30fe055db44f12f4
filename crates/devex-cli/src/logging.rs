//! Structured logging setup: a human-readable stderr layer for interactive
//! use, plus the durable JSON-lines file sink `logs/devex-YYYYMMDD.log`
//! required by §6's line protocol (`level`, `ts`, `source`, plus k=v pairs).

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A [`MakeWriter`] that appends to `<log_dir>/devex-YYYYMMDD.log`, reopening
/// the file whenever the calendar date rolls over mid-process.
struct DailyFile {
    log_dir: PathBuf,
    current: Mutex<Option<(String, std::fs::File)>>,
}

impl DailyFile {
    fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            current: Mutex::new(None),
        }
    }

    fn open_today(&self) -> io::Result<std::fs::File> {
        let stamp = chrono::Utc::now().format("%Y%m%d").to_string();
        let mut guard = self.current.lock().expect("log file mutex poisoned");
        if let Some((day, file)) = guard.as_ref() {
            if *day == stamp {
                return file.try_clone();
            }
        }
        std::fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(format!("devex-{stamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let cloned = file.try_clone()?;
        *guard = Some((stamp, file));
        Ok(cloned)
    }
}

impl<'a> MakeWriter<'a> for DailyFile {
    type Writer = std::fs::File;

    fn make_writer(&'a self) -> Self::Writer {
        self.open_today().unwrap_or_else(|_| {
            // Falls back to a throwaway sink (`/dev/null` is unavailable
            // portably, so discard via a file opened in the system temp
            // dir) rather than panicking the whole process over a log write.
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(std::env::temp_dir().join("devex-log-fallback.log"))
                .expect("temp dir must be writable")
        })
    }
}

/// Installs the global tracing subscriber: an `EnvFilter`-gated stderr
/// layer for interactive feedback, and a newline-delimited-JSON layer
/// writing into `log_dir` (§6 persisted layout).
pub fn init(log_dir: PathBuf) {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr).with_target(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(DailyFile::new(log_dir))
        .with_current_span(false)
        .with_span_list(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(stderr_layer)
        .with(file_layer)
        .init();
}
