//! Structured diagnostics visitor.
//!
//! Packed structures describe themselves by emitting a stream of groups and
//! named values to a [`DataEventHandler`]. The handler decides what to do
//! with them: [`TextDumper`] renders an indented listing, other handlers may
//! record or validate the stream.

use serde::Serialize;
use std::fmt::{self, Write as _};

/// A single named value emitted by `generate_data_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Unsigned integer (sizes, offsets, unsigned elements).
    Unsigned(u64),
    /// Signed integer elements.
    Signed(i64),
    /// Short symbolic value, e.g. a segment kind.
    Text(String),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<usize> for DataValue {
    fn from(v: usize) -> Self {
        Self::Unsigned(v as u64)
    }
}

impl From<u64> for DataValue {
    fn from(v: u64) -> Self {
        Self::Unsigned(v)
    }
}

impl From<u32> for DataValue {
    fn from(v: u32) -> Self {
        Self::Unsigned(u64::from(v))
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::Signed(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        Self::Signed(i64::from(v))
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Receiver of diagnostic events.
pub trait DataEventHandler {
    /// Opens a named group. `len` is the number of items, when meaningful.
    fn start_group(&mut self, name: &str, len: Option<usize>);

    /// Closes the innermost open group.
    fn end_group(&mut self);

    /// Emits a named value in the current group.
    fn value(&mut self, name: &str, value: DataValue);
}

/// Renders events as an indented text listing.
#[derive(Debug, Default)]
pub struct TextDumper {
    out: String,
    depth: usize,
}

impl TextDumper {
    /// Creates an empty dumper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rendered text.
    #[must_use]
    pub fn finish(self) -> String {
        self.out
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }
}

impl DataEventHandler for TextDumper {
    fn start_group(&mut self, name: &str, len: Option<usize>) {
        self.indent();
        // Writing into a String never fails.
        let _ = match len {
            Some(len) => writeln!(self.out, "{name} [{len}] {{"),
            None => writeln!(self.out, "{name} {{"),
        };
        self.depth += 1;
    }

    fn end_group(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("}\n");
    }

    fn value(&mut self, name: &str, value: DataValue) {
        self.indent();
        let _ = writeln!(self.out, "{name}: {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_dumper_indents_groups() {
        let mut dumper = TextDumper::new();
        dumper.start_group("ALLOCATOR", None);
        dumper.value("BLOCK_SIZE", 64usize.into());
        dumper.start_group("VALUES", Some(2));
        dumper.value("0", (-3i64).into());
        dumper.value("1", "raw".into());
        dumper.end_group();
        dumper.end_group();

        let text = dumper.finish();
        assert_eq!(
            text,
            "ALLOCATOR {\n  BLOCK_SIZE: 64\n  VALUES [2] {\n    0: -3\n    1: raw\n  }\n}\n"
        );
    }
}
