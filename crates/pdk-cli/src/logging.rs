// Logging setup. Every sink sits behind the secret masker unless the
// user opted out with --no-redact; --log-file and --log-json add
// additional masked layers.

use parking_lot::Mutex;
use pdk_core::{LogLevel, SecretMasker};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Writer that masks registered secrets before handing bytes on.
pub struct MaskingWriter<W: Write> {
    inner: W,
    masker: Option<Arc<SecretMasker>>,
}

impl<W: Write> Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.masker {
            Some(masker) => {
                let text = String::from_utf8_lossy(buf);
                let masked = masker.mask(&text);
                self.inner.write_all(masked.as_bytes())?;
                Ok(buf.len())
            }
            None => {
                self.inner.write_all(buf)?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// MakeWriter for stderr with masking applied.
#[derive(Clone)]
pub struct MaskingStderr {
    masker: Option<Arc<SecretMasker>>,
}

impl<'a> MakeWriter<'a> for MaskingStderr {
    type Writer = MaskingWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter {
            inner: io::stderr(),
            masker: self.masker.clone(),
        }
    }
}

/// Shared-file writer used by the --log-file / --log-json layers.
#[derive(Clone)]
pub struct MaskingFile {
    file: Arc<Mutex<File>>,
    masker: Option<Arc<SecretMasker>>,
}

pub struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for MaskingFile {
    type Writer = MaskingWriter<SharedFileWriter>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter {
            inner: SharedFileWriter {
                file: Arc::clone(&self.file),
            },
            masker: self.masker.clone(),
        }
    }
}

/// Install the global subscriber.
///
/// `no_redact` drops the masker from every sink; the raw values then
/// appear in output and log files.
pub fn init(
    level: LogLevel,
    masker: Arc<SecretMasker>,
    no_redact: bool,
    log_file: Option<&Path>,
    log_json: Option<&Path>,
) -> anyhow::Result<()> {
    let directive = match level {
        LogLevel::Silent => "error",
        LogLevel::Quiet => "warn",
        LogLevel::Normal => "info",
        LogLevel::Verbose => "debug",
        LogLevel::Trace => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let sink_masker = (!no_redact).then_some(masker);

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(MaskingStderr {
            masker: sink_masker.clone(),
        });

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(MaskingFile {
                        file: Arc::new(Mutex::new(file)),
                        masker: sink_masker.clone(),
                    }),
            )
        }
        None => None,
    };

    let json_layer = match log_json {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(MaskingFile {
                        file: Arc::new(Mutex::new(file)),
                        masker: sink_masker,
                    }),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .with(json_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_writer_replaces_secret() {
        let masker = Arc::new(SecretMasker::new());
        masker.register("abc-123-xyz");

        let mut sink = Vec::new();
        {
            let mut writer = MaskingWriter {
                inner: &mut sink,
                masker: Some(masker),
            };
            writer.write_all(b"my key is abc-123-xyz and more\n").unwrap();
        }
        let written = String::from_utf8(sink).unwrap();
        assert_eq!(written, "my key is *** and more\n");
    }

    #[test]
    fn test_no_redact_passes_through() {
        let mut sink = Vec::new();
        {
            let mut writer: MaskingWriter<&mut Vec<u8>> = MaskingWriter {
                inner: &mut sink,
                masker: None,
            };
            writer.write_all(b"raw abc-123-xyz").unwrap();
        }
        assert_eq!(sink, b"raw abc-123-xyz");
    }
}
