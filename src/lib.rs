pub mod agent_core;
pub mod config;
pub mod inference;
pub mod retrieval;
pub mod service;
pub mod tools;

use std::path::{Path, PathBuf};

use config::LoggingConfig;

/// Log files kept besides the current one.
const LOG_ROTATIONS: u32 = 3;

/// Return the platform-standard data directory for the chatbot.
///
/// - macOS: `~/Library/Application Support/mcp-chatbot/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-chatbot\`
/// - Linux: `$XDG_DATA_HOME/mcp-chatbot/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-chatbot/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-chatbot");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-chatbot")
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides `config.filter`. When `config.file` is set, logs go
/// to that file (relative paths resolve under [`data_dir`]) after rotating
/// the previous ones; otherwise they go to stderr.
///
/// Returns the log file path, if any. Fails if a global subscriber is
/// already installed or the log file cannot be opened.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<Option<PathBuf>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let log_path = config.file.as_ref().map(|file| {
        if file.is_absolute() {
            file.clone()
        } else {
            data_dir().join(file)
        }
    });

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let result = match &log_path {
        Some(path) => {
            let writer = open_log_file(path)?;
            if config.json {
                builder.json().with_writer(writer).with_ansi(false).try_init()
            } else {
                builder.with_writer(writer).with_ansi(false).try_init()
            }
        }
        None => {
            if config.json {
                builder.json().with_writer(std::io::stderr).try_init()
            } else {
                builder.with_writer(std::io::stderr).try_init()
            }
        }
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir().display(),
        log_file = ?log_path,
        pid = std::process::id(),
        "=== MCP Chatbot starting ==="
    );

    Ok(log_path)
}

/// Rotate previous logs and open a fresh one behind a flushing writer.
fn open_log_file(path: &Path) -> anyhow::Result<FlushingWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    rotate_log_file(path, LOG_ROTATIONS);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", path.display()))?;
    Ok(FlushingWriter::new(file))
}

/// Rotate log files: `chat.log` → `chat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
