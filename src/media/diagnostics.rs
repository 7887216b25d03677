//! Transcoder diagnostic line classification
//!
//! The transcoder's stderr is never parsed for control decisions beyond
//! keyword matching. Lines are sorted into three buckets: chatter, lines
//! worth logging, and lines that mean the upstream is gone.

/// Maximum characters of a diagnostic line kept for logging
pub const MAX_LOGGED_LINE: usize = 200;

/// Keywords marking a line as an error worth logging
const WARNING_KEYWORDS: &[&str] = &["error", "Error", "failed", "Invalid"];

/// Keywords marking the upstream as unusable
const FATAL_KEYWORDS: &[&str] = &[
    "Connection refused",
    "Connection timed out",
    "No route to host",
    "401 Unauthorized",
    "404 Not Found",
    "Conversion failed",
    "Invalid data found when processing input",
];

/// Severity of a diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Progress output and banners
    Info,
    /// Error keyword present, stream may continue
    Warning,
    /// Upstream failure, the session cannot continue
    Fatal,
}

/// A classified line from the transcoder's error channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    /// Classification
    pub level: DiagnosticLevel,
    /// Line text, truncated to [`MAX_LOGGED_LINE`] characters
    pub text: String,
}

impl DiagnosticLine {
    /// Classify a raw line
    pub fn classify(line: &str) -> Self {
        let level = if FATAL_KEYWORDS.iter().any(|k| line.contains(k)) {
            DiagnosticLevel::Fatal
        } else if WARNING_KEYWORDS.iter().any(|k| line.contains(k)) {
            DiagnosticLevel::Warning
        } else {
            DiagnosticLevel::Info
        };

        Self {
            level,
            text: line.chars().take(MAX_LOGGED_LINE).collect(),
        }
    }

    /// Whether this line ends the session
    pub fn is_fatal(&self) -> bool {
        self.level == DiagnosticLevel::Fatal
    }
}
