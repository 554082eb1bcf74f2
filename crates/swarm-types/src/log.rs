//! Per-agent log levels.

use serde::{Deserialize, Serialize};

/// Verbosity of an agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Quiet,
    Info,
    Verbose,
    Trace,
}

impl LogLevel {
    /// Parse a level name; unknown names are quiet.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "informative" => LogLevel::Info,
            "verbose" | "debug" => LogLevel::Verbose,
            "trace" | "tracing" => LogLevel::Trace,
            _ => LogLevel::Quiet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Trace => "trace",
        }
    }

    /// Matching `tracing` filter directive.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(LogLevel::parse("VERBOSE"), LogLevel::Verbose);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Quiet);
        assert!(LogLevel::Trace > LogLevel::Info);
        assert_eq!(LogLevel::Verbose.filter_directive(), "debug");
    }
}
