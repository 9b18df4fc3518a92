//! Line-oriented logging sink handed in by the caller.
//!
//! Compiler stdout goes to [`Sink::info`], stderr to [`Sink::error`].

/// Destination for progress messages and compiler output.
pub trait Sink {
    fn info(&self, line: &str);
    fn debug(&self, line: &str);
    fn warn(&self, line: &str);
    fn error(&self, line: &str);
}

/// Forwards every line to the `log` facade under the `kaitai` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn info(&self, line: &str) {
        log::info!(target: "kaitai", "{line}");
    }

    fn debug(&self, line: &str) {
        log::debug!(target: "kaitai", "{line}");
    }

    fn warn(&self, line: &str) {
        log::warn!(target: "kaitai", "{line}");
    }

    fn error(&self, line: &str) {
        log::error!(target: "kaitai", "{line}");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopSink;

impl Sink for NopSink {
    fn info(&self, _line: &str) {}
    fn debug(&self, _line: &str) {}
    fn warn(&self, _line: &str) {}
    fn error(&self, _line: &str) {}
}

/// Split a chunk of process output into trimmed, non-empty lines.
pub(crate) fn log_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}
