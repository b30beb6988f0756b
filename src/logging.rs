use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Routes formatted events to stderr, or swallows them when diagnostics are off.
#[derive(Clone, Copy)]
pub(crate) struct QuietMakeWriter {
    pub enabled: bool,
}

impl<'a> MakeWriter<'a> for QuietMakeWriter {
    type Writer = QuietWriter;

    fn make_writer(&'a self) -> Self::Writer {
        QuietWriter {
            enabled: self.enabled,
        }
    }
}

pub(crate) struct QuietWriter {
    enabled: bool,
}

impl std::io::Write for QuietWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.enabled {
            std::io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        if self.enabled {
            std::io::stderr().flush()?;
        }
        Ok(())
    }
}

/// Maps `--verbose` and the configured `log_level` to a subscriber level.
/// `None` means the beacon stays silent.
pub(crate) fn resolve_level(verbose: bool, configured: Option<&str>) -> Option<Level> {
    let parsed = configured.and_then(|l| l.trim().parse::<Level>().ok());
    match (verbose, parsed) {
        (_, Some(level)) => Some(level),
        (true, None) => Some(Level::DEBUG),
        (false, None) => None,
    }
}

pub(crate) fn init(level: Option<Level>) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level.unwrap_or(Level::ERROR))
        .with_ansi(false)
        .with_writer(QuietMakeWriter {
            enabled: level.is_some(),
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
