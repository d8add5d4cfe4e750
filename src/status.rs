//! Operator-facing status lines.
//!
//! Every step produces one or two short, colored console lines. The same text
//! is emitted as a `tracing` event so it lands in the run transcript.

use crossterm::style::{style, Color, PrintStyledContent, Stylize};
use std::fmt;
use std::io::{IsTerminal, Write};
use tracing::{info, warn};

/// Target used for status events so transcript readers can filter on it.
pub const STATUS_TARGET: &str = "deskstrap::status";

/// One status line about a catalog step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// Marker already present, action not invoked
    Skipped { name: String },
    /// Action about to run
    Started { name: String },
    /// Action completed and marker written
    Succeeded { name: String },
    /// Action (or marker write) failed
    Failed { name: String, message: String },
}

impl StatusLine {
    fn color(&self) -> Color {
        match self {
            Self::Skipped { .. } => Color::Yellow,
            Self::Started { .. } => Color::Cyan,
            Self::Succeeded { .. } => Color::Green,
            Self::Failed { .. } => Color::Red,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped { name } => write!(f, "{} : already completed, skipping", name),
            Self::Started { name } => write!(f, "---- {} ----", name),
            Self::Succeeded { name } => write!(f, "{} : OK", name),
            Self::Failed { name, message } => write!(f, "{} : FAILED - {}", name, message),
        }
    }
}

/// Sink for step status lines.
pub trait StatusReporter {
    fn report(&mut self, line: StatusLine);
}

impl<T: StatusReporter + ?Sized> StatusReporter for &mut T {
    fn report(&mut self, line: StatusLine) {
        (**self).report(line)
    }
}

/// Prints colored status lines to stdout and mirrors them into the transcript.
#[derive(Debug)]
pub struct ConsoleReporter {
    color: bool,
}

impl ConsoleReporter {
    /// Color is used only when stdout is a terminal
    pub fn new() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for ConsoleReporter {
    fn report(&mut self, line: StatusLine) {
        let text = line.to_string();
        info!(target: STATUS_TARGET, "{}", text);

        let mut out = std::io::stdout().lock();
        let written = if self.color {
            crossterm::execute!(out, PrintStyledContent(style(text.as_str()).with(line.color())))
                .and_then(|_| writeln!(out))
        } else {
            writeln!(out, "{}", text)
        };
        if let Err(e) = written {
            warn!("Failed to write status line to console: {}", e);
        }
    }
}

/// Collects rendered status lines in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    pub lines: Vec<String>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any recorded line equals `expected`
    pub fn contains(&self, expected: &str) -> bool {
        self.lines.iter().any(|l| l == expected)
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&mut self, line: StatusLine) {
        info!(target: STATUS_TARGET, "{}", line);
        self.lines.push(line.to_string());
    }
}
