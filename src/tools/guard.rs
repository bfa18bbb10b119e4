//! Dangerous operation guard for the `execute_query` tool.
//!
//! Free-form q is checked against an ordered denylist of regular expressions
//! before it reaches the engine. q has no parser we can lean on here, so this
//! is a best-effort filter and not a security boundary: it stops the obvious
//! destructive commands, nothing more.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// Type of dangerous q operation detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerousOperationType {
    Drop,
    DeleteFrom,
    ExitSession,
    LoadFromRoot,
    Exit,
    DynamicValue,
    SystemCommand,
    HandleClose,
    FileDelete,
    RootFileHandle,
}

impl DangerousOperationType {
    /// All checked operations, in matching order.
    pub const ALL: [Self; 10] = [
        Self::Drop,
        Self::DeleteFrom,
        Self::ExitSession,
        Self::LoadFromRoot,
        Self::Exit,
        Self::DynamicValue,
        Self::SystemCommand,
        Self::HandleClose,
        Self::FileDelete,
        Self::RootFileHandle,
    ];

    /// The regular expression matched (case-insensitively) against the query.
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::Drop => r"\bdrop\b",
            Self::DeleteFrom => r"\bdelete\s+from\b",
            Self::ExitSession => r"\\\\",
            Self::LoadFromRoot => r"\\l\s+/",
            Self::Exit => r"\bexit\b",
            Self::DynamicValue => r#"\bvalue\s*""#,
            Self::SystemCommand => r"\bsystem\b",
            Self::HandleClose => r"\bhclose\b",
            Self::FileDelete => r"\bhdel\b",
            Self::RootFileHandle => r"`:/",
        }
    }

    /// Get the reason why this operation is dangerous.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Drop => "drops schema objects",
            Self::DeleteFrom => "deletes rows",
            Self::ExitSession => "terminates the q session",
            Self::LoadFromRoot => "loads scripts from the filesystem root",
            Self::Exit => "exits the q process",
            Self::DynamicValue => "evaluates dynamically built code",
            Self::SystemCommand => "runs system commands",
            Self::HandleClose => "closes connection handles",
            Self::FileDelete => "deletes files",
            Self::RootFileHandle => "opens a file handle at the filesystem root",
        }
    }

    /// Message naming the matched pattern.
    pub fn describe(&self) -> String {
        format!(
            "Query contains dangerous pattern: {} ({})",
            self.pattern(),
            self.reason()
        )
    }
}

static DANGER_PATTERNS: LazyLock<Vec<(Regex, DangerousOperationType)>> = LazyLock::new(|| {
    DangerousOperationType::ALL
        .iter()
        .map(|op| {
            let regex = RegexBuilder::new(op.pattern())
                .case_insensitive(true)
                .build()
                .expect("danger pattern must be a valid regex");
            (regex, *op)
        })
        .collect()
});

/// Result of checking q for dangerous operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DangerousOperationResult {
    /// No pattern matched
    Safe,
    /// The first matching pattern
    Dangerous(DangerousOperationType),
}

/// Flat form of a scan: `(false, "")` when nothing matched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanResult {
    pub is_dangerous: bool,
    pub reason: String,
}

/// Check q text against the denylist. The first match in pattern order wins.
///
/// # Examples
///
/// ```
/// use kdb_mcp_server::tools::guard::{check_dangerous_q, DangerousOperationResult, DangerousOperationType};
///
/// let result = check_dangerous_q("delete from trades");
/// assert_eq!(result, DangerousOperationResult::Dangerous(DangerousOperationType::DeleteFrom));
///
/// let result = check_dangerous_q("select from trades where price > 10");
/// assert_eq!(result, DangerousOperationResult::Safe);
/// ```
pub fn check_dangerous_q(query: &str) -> DangerousOperationResult {
    DANGER_PATTERNS
        .iter()
        .find(|(regex, _)| regex.is_match(query))
        .map(|(_, op)| DangerousOperationResult::Dangerous(*op))
        .unwrap_or(DangerousOperationResult::Safe)
}

/// Scan q text, returning whether it is dangerous and why.
pub fn scan(query: &str) -> ScanResult {
    match check_dangerous_q(query) {
        DangerousOperationResult::Safe => ScanResult::default(),
        DangerousOperationResult::Dangerous(op) => ScanResult {
            is_dangerous: true,
            reason: op.describe(),
        },
    }
}
