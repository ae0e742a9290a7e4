//! Diagnostics.
//!
//! The original interpreter calls `exit(1)` the moment it detects a compile
//! error, from deep inside the parser/code generator. The spec's own design
//! notes (§9) call that out as worth fixing in a port: a host embedding a
//! scripting language should get a typed error back, not have its process
//! torn down out from under it. `CompileError` and `RuntimeFault` carry
//! everything the original's diagnostic line did (file, line, message) plus
//! the same source window, but as data the caller decides what to do with.

use std::fmt;

/// A rendered window of source lines around a diagnostic location,
/// matching `ReportErrorV`'s "print every line within 3 lines of the
/// error, with an arrow at the error line" behavior.
pub fn render_source_window(source: &str, line: usize) -> String {
    let mut out = String::new();
    for (idx, text) in source.lines().enumerate() {
        let lineno = idx + 1;
        if (line as isize - lineno as isize).unsigned_abs() < 3 {
            if lineno == line {
                out.push_str(&format!("{lineno} ->\t{text}\n"));
            } else {
                out.push_str(&format!("{lineno}\t{text}\n"));
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: usize,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: usize) -> SourceLoc {
        SourceLoc {
            file: file.into(),
            line,
        }
    }
}

/// A fatal, source-located compile-time error (spec §7, taxonomy 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub loc: SourceLoc,
    pub message: String,
    pub window: String,
}

impl CompileError {
    pub fn new(source: &str, loc: SourceLoc, message: impl Into<String>) -> CompileError {
        let window = render_source_window(source, loc.line);
        CompileError {
            loc,
            message: message.into(),
            window,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        write!(f, "{}", self.window)?;
        writeln!(f)?;
        write!(f, "{}({}): {}", self.loc.file, self.loc.line, self.message)
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
}

/// A non-fatal compile-time observation (e.g. "constant declared inside a
/// function body still has global scope"). The original prints these to
/// stderr and keeps going; the port collects them so a host can inspect
/// them programmatically instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: SourceLoc,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}): warning: {}",
            self.loc.file, self.loc.line, self.message
        )
    }
}

/// A fatal runtime condition (spec §7, taxonomy 2). Returned from
/// `Thread::execute_cycle` instead of asserting, so a host can decide how
/// (or whether) to recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    StackOverflow,
    StackUnderflow,
    IndirectionStackOverflow,
    IndirectionStackUnderflow,
    /// `GOTOZ`/`LOG_*` operand was not a `Bool`.
    TypeError { op: &'static str, found: &'static str },
    /// Opcode byte didn't decode to a known instruction - indicates a
    /// corrupted or hand-assembled program.
    InvalidOpcode { pc: usize, byte: u8 },
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFault::StackOverflow => write!(f, "value stack overflow"),
            RuntimeFault::StackUnderflow => write!(f, "value stack underflow"),
            RuntimeFault::IndirectionStackOverflow => write!(f, "indirection stack overflow"),
            RuntimeFault::IndirectionStackUnderflow => write!(f, "indirection stack underflow"),
            RuntimeFault::TypeError { op, found } => {
                write!(f, "{op} expected a Bool operand, found {found}")
            }
            RuntimeFault::InvalidOpcode { pc, byte } => {
                write!(f, "invalid opcode 0x{byte:02x} at pc={pc}")
            }
        }
    }
}

impl std::error::Error for RuntimeFault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_centers_on_the_error_line_with_an_arrow() {
        let src = "a\nb\nc\nd\ne\nf\ng";
        let window = render_source_window(src, 4);
        assert_eq!(window, "2\tb\n3\tc\n4 ->\td\n5\te\n6\tf\n");
    }

    #[test]
    fn window_is_empty_past_three_lines_away() {
        let src = "a\nb\nc\nd\ne\nf\ng";
        let window = render_source_window(src, 1);
        assert_eq!(window, "1 ->\ta\n2\tb\n3\tc\n");
    }
}
