//! Normalization of compiler output into structured diagnostics.

use serde::Serialize;

/// Severity level of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// A single structured diagnostic from the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    /// Source file path, if the compiler reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {level}: {}", self.message),
            (Some(file), None) => write!(f, "{file}: {level}: {}", self.message),
            _ => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Parse compiler output into structured diagnostics.
///
/// Recognized forms, one per line:
/// - `src/A.java:10:5: error: message`
/// - `src/A.java:10: warning: message`
/// - `error: message`
///
/// Anything else (source excerpts, caret lines, notes) is skipped.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_located(line).or_else(|| parse_bare(line)))
        .collect()
}

fn parse_located(line: &str) -> Option<Diagnostic> {
    for marker in [": error:", ": warning:", ": info:"] {
        let Some(pos) = line.find(marker) else {
            continue;
        };
        let location = line.get(..pos)?;
        let rest = line.get(pos.checked_add(2)?..)?;
        if let Some((file, line_no)) = split_location(location) {
            let (level, message) = parse_level_message(rest)?;
            return Some(Diagnostic {
                level,
                message,
                file: Some(file),
                line: Some(line_no),
            });
        }
    }
    None
}

/// Split `file:line:col` or `file:line` into the file and the line number.
fn split_location(s: &str) -> Option<(String, u32)> {
    let (head, last) = s.rsplit_once(':')?;
    let last: u32 = last.parse().ok()?;

    // `file:line:col`: the line is the middle part.
    if let Some((file, line)) = head.rsplit_once(':') {
        if let Ok(line) = line.parse::<u32>() {
            return (!file.is_empty()).then(|| (file.to_owned(), line));
        }
    }
    (!head.is_empty()).then(|| (head.to_owned(), last))
}

fn parse_bare(line: &str) -> Option<Diagnostic> {
    let (level, message) = parse_level_message(line)?;
    Some(Diagnostic {
        level,
        message,
        file: None,
        line: None,
    })
}

fn parse_level_message(s: &str) -> Option<(DiagnosticLevel, String)> {
    [
        ("error:", DiagnosticLevel::Error),
        ("warning:", DiagnosticLevel::Warning),
        ("info:", DiagnosticLevel::Info),
    ]
    .into_iter()
    .find_map(|(prefix, level)| {
        s.strip_prefix(prefix)
            .map(|msg| (level, msg.trim().to_owned()))
    })
}
