//! Structured error handling and exit codes.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: Success (completed normally)
/// - 1: General error (unexpected failure)
/// - 2: No duplicates found
/// - 3: Partial success (some files could not be scanned or linked)
/// - 4: Data loss (a duplicate was deleted but its link could not be created)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed.
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// No duplicates: the scan completed but found nothing to link.
    NoDuplicates = 2,
    /// Partial success: completed with non-fatal per-file errors.
    PartialSuccess = 3,
    /// Data loss: at least one file was deleted without a replacement link.
    DataLoss = 4,
    /// Interrupted: cancelled by the user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DL000",
            Self::GeneralError => "DL001",
            Self::NoDuplicates => "DL002",
            Self::PartialSuccess => "DL003",
            Self::DataLoss => "DL004",
            Self::Interrupted => "DL130",
        }
    }

    /// The more severe of two outcomes.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::NoDuplicates => 1,
            Self::PartialSuccess => 2,
            Self::GeneralError => 3,
            Self::Interrupted => 4,
            Self::DataLoss => 5,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DL001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
