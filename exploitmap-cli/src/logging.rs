//! Log output with sensitive text masked.
//!
//! Every formatted event passes through [`mask`] before it reaches the
//! terminal, so a field that skipped masking at its call site still cannot
//! leak an address or credential.

use std::io::{self, Write};

use exploitmap_output::mask;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Wraps a [`MakeWriter`] so each write is masked.
pub struct MaskingMakeWriter<M> {
    inner: M,
}

impl<M> MaskingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for MaskingMakeWriter<M> {
    type Writer = MaskingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter(self.inner.make_writer())
    }
}

pub struct MaskingWriter<W>(W);

impl<W: Write> Write for MaskingWriter<W> {
    // The formatter hands over one complete event per call.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.0.write_all(mask(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Map `-v` occurrences to a level filter; `RUST_LOG` wins when set.
pub fn init(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_ansi(false)
        .with_writer(MaskingMakeWriter::new(io::stderr))
        .init();
}
