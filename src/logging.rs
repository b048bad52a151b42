use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Log lines kept for `/api/logs` subscribers that fall behind.
pub(crate) const LOG_CHANNEL_CAPACITY: usize = 512;

/// Tees every formatted log line into a broadcast channel, and to stdout
/// unless suppressed.
#[derive(Clone)]
pub(crate) struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).trim_end().to_string();
        if !msg.is_empty() {
            let _ = self.sender.send(msg); // no subscribers is fine
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber and hand back the channel behind `/api/logs`.
pub(crate) fn init(verbose: bool, suppress_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .with_writer(SseMakeWriter {
            sender: log_tx.clone(),
            suppress_stdout,
        })
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Logging was already initialised");
    }
    log_tx
}
