//! Command filtering and progress counting
//!
//! Normalises outgoing G-code before it is queued:
//! - whole files are split so every M/G/T word starts its own line, and
//!   comment-only and blank lines are dropped
//! - single requests can have coordinate decimals truncated to a fixed
//!   precision
//!
//! [`count`] estimates how many board responses a line produces, which is
//! what progress percentages are computed against.

use regex::Regex;
use std::sync::OnceLock;

/// Extra planner slots an arc move is assumed to occupy
pub const ARC_EXTRA_SLOTS: u32 = 3;

fn split_words_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" +([MTG])").expect("invalid regex pattern"))
}

fn comment_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:\([^)\n]*\)|;[^\n]*)[ \t]*$").expect("invalid regex pattern")
    })
}

fn blank_lines_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("invalid regex pattern"))
}

fn precision_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([XYZAIJKRP])(\s*)([-+]?\d*)\.(\d+)").expect("invalid regex pattern")
    })
}

fn command_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:M|G|T|S|F)(\d+)").expect("invalid regex pattern"))
}

fn arc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^G0?[23](?:\D|$)").expect("invalid regex pattern"))
}

/// Rewrites outgoing lines according to the behaviour flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFilter {
    precision: Option<usize>,
}

impl CommandFilter {
    /// Create a filter; `precision` enables decimal truncation
    pub fn new(precision: Option<usize>) -> Self {
        Self { precision }
    }

    /// Digits kept after the decimal point, if truncation is enabled
    pub fn precision(&self) -> Option<usize> {
        self.precision
    }

    /// Normalise a whole program before it is split into lines
    pub fn filter_file(&self, content: &str) -> String {
        let split = split_words_regex().replace_all(content, "\n$1");
        let stripped = comment_line_regex().replace_all(&split, "");
        blank_lines_regex().replace_all(&stripped, "\n").into_owned()
    }

    /// Normalise a single line before it is queued
    ///
    /// Axis and parameter letters and the whitespace after them are kept;
    /// only the digits after the decimal point are cut.
    pub fn filter_request(&self, line: &str) -> String {
        match self.precision {
            Some(precision) => precision_regex()
                .replace_all(line, |caps: &regex::Captures| {
                    let decimals = &caps[4];
                    format!(
                        "{}{}{}.{}",
                        &caps[1],
                        &caps[2],
                        &caps[3],
                        &decimals[..decimals.len().min(precision)]
                    )
                })
                .into_owned(),
            None => line.to_string(),
        }
    }
}

/// Responses a line is expected to produce on the board
///
/// Any M/G/T/S/F command word counts once; G2/G3 arcs count
/// [`ARC_EXTRA_SLOTS`] more since the planner splits them up.
pub fn count(line: &str) -> u32 {
    let line = line.trim_start();
    if !command_regex().is_match(line) {
        return 0;
    }
    if arc_regex().is_match(line) {
        1 + ARC_EXTRA_SLOTS
    } else {
        1
    }
}

/// Total expected responses for a batch of lines
pub fn count_all<S: AsRef<str>>(lines: &[S]) -> u32 {
    lines.iter().map(|line| count(line.as_ref())).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_arc_bonus() {
        assert_eq!(count("G1 X10"), 1);
        assert_eq!(count("G2 X20 Y20 I5 J5"), 4);
        assert_eq!(count("G03 X1 Y1 R2"), 4);
        assert_eq!(count("G21"), 1);
        assert_eq!(count("G28.2 X0"), 1);
        assert_eq!(count("X10 Y10"), 0);
        assert_eq!(count("$$"), 0);
    }

    #[test]
    fn test_filter_file_splits_words() {
        let filter = CommandFilter::default();
        assert_eq!(filter.filter_file("G21 G90 M3 S1000"), "G21\nG90\nM3 S1000");
    }

    #[test]
    fn test_filter_file_strips_comments_and_blanks() {
        let filter = CommandFilter::default();
        let content = "G0 X1\n(move up)\n\n; note\n   \nG0 X2\n";
        assert_eq!(filter.filter_file(content), "G0 X1\nG0 X2\n");
    }

    #[test]
    fn test_filter_request_truncates() {
        let filter = CommandFilter::new(Some(2));
        assert_eq!(
            filter.filter_request("G1 X1.23456 y -0.5 F500.125"),
            "G1 X1.23 y -0.5 F500.125"
        );
        assert_eq!(filter.filter_request("G2 I.12345 J-3.999"), "G2 I.12 J-3.99");
    }

    #[test]
    fn test_filter_request_disabled() {
        let filter = CommandFilter::new(None);
        assert_eq!(filter.filter_request("G1 X1.23456"), "G1 X1.23456");
    }
}
