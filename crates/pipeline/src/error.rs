//! Pipeline error taxonomy.
//!
//! Every variant is fatal to the run. Nothing is recovered locally and
//! nothing is retried; the orchestrator returns the first error it sees and
//! the binary maps it to a process exit status.

use thiserror::Error;

/// The pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Run configuration was rejected before any stage started.
    Configuration,
    /// Compiler Stage (`cargo build`).
    Compile,
    /// Flash Stage (adapter tool).
    Flash,
}

impl Stage {
    /// Human-readable stage name used in operator messages.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::Compile => "compile stage",
            Stage::Flash => "flash stage",
        }
    }
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Compile error, linker error, missing toolchain component or cargo not runnable.
    #[error("compile stage failed: {0}")]
    CompileError(String),

    /// The build did not leave a valid, current artifact at the expected path.
    #[error("compile stage failed: artifact missing: {0}")]
    ArtifactMissing(String),

    /// Adapter tool not installed, adapter not enumerable, or target unreachable.
    #[error("flash stage failed: debug adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// Target core did not respond to halt.
    #[error("flash stage failed: target did not halt: {0}")]
    HaltFailure(String),

    /// Flash erase failed.
    #[error("flash stage failed: erase failed: {0}")]
    EraseFailure(String),

    /// Write failed or verify reported a mismatch.
    #[error("flash stage failed: write/verify mismatch: {0}")]
    WriteVerifyMismatch(String),

    /// Core reset after programming failed.
    #[error("flash stage failed: reset failed: {0}")]
    ResetFailure(String),

    /// Invalid run configuration, detected before the Compiler Stage.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// The stage this error aborted.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Configuration,
            Self::CompileError(_) | Self::ArtifactMissing(_) => Stage::Compile,
            Self::AdapterUnavailable(_)
            | Self::HaltFailure(_)
            | Self::EraseFailure(_)
            | Self::WriteVerifyMismatch(_)
            | Self::ResetFailure(_) => Stage::Flash,
        }
    }

    /// Short kind name, stable across releases (used in logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CompileError(_) => "CompileError",
            Self::ArtifactMissing(_) => "ArtifactMissing",
            Self::AdapterUnavailable(_) => "AdapterUnavailable",
            Self::HaltFailure(_) => "HaltFailure",
            Self::EraseFailure(_) => "EraseFailure",
            Self::WriteVerifyMismatch(_) => "WriteVerifyMismatch",
            Self::ResetFailure(_) => "ResetFailure",
            Self::Config(_) => "Config",
        }
    }

    /// Process exit status for this error. Always non-zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::CompileError(_) => 1,
            Self::ArtifactMissing(_) => 2,
            Self::AdapterUnavailable(_) => 3,
            Self::HaltFailure(_) => 4,
            Self::EraseFailure(_) => 5,
            Self::WriteVerifyMismatch(_) => 6,
            Self::ResetFailure(_) => 7,
            // EX_USAGE
            Self::Config(_) => 64,
        }
    }
}
