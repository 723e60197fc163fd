//! Console output for the CLI.
//!
//! Everything goes to stderr, in four registers: `==>` for a phase, `  ->` for
//! a step within it, and the warning and error headlines.
use console::style;
use std::fmt::Display;
use std::io::{IsTerminal, stderr};

/// Output styling decided once at startup and handed to whoever prints.
#[derive(Clone, Copy, Debug)]
pub struct Palette {
    pub color: bool,
}

impl Palette {
    /// Colour is used only when stderr is a terminal.
    pub fn detect() -> Self {
        Self {
            color: stderr().is_terminal(),
        }
    }

    pub fn msg(&self, text: impl Display) {
        eprintln!(
            "{}{}",
            style("==>").green().bold().force_styling(self.color),
            style(format!(" {text}")).bold().force_styling(self.color)
        );
    }

    pub fn msg2(&self, text: impl Display) {
        eprintln!(
            "{}{}",
            style("  ->").blue().bold().force_styling(self.color),
            style(format!(" {text}")).bold().force_styling(self.color)
        );
    }

    pub fn warning(&self, text: impl Display) {
        eprintln!(
            "{}{}",
            style("==> WARNING:").yellow().bold().force_styling(self.color),
            style(format!(" {text}")).bold().force_styling(self.color)
        );
    }

    pub fn error(&self, text: impl Display) {
        eprintln!(
            "{}{}",
            style("==> ERROR:").red().bold().force_styling(self.color),
            style(format!(" {text}")).bold().force_styling(self.color)
        );
    }

    /// Indented raw tool output, one line at a time.
    pub fn detail(&self, text: &str) {
        for line in text.trim_end().lines() {
            eprintln!("    {line}");
        }
    }

    /// Prints an overwritable status line (no newline).
    pub fn status(&self, line: &str) {
        if self.color {
            eprint!("\r\x1b[K{line}");
        } else {
            eprint!("\r{line}");
        }
    }
}
