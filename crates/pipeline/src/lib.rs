//! Fail-fast firmware build-and-flash pipeline.
//!
//! Compile a firmware binary for a bare-metal target with cargo, then hand
//! the artifact path to an external debug-adapter tool that programs,
//! verifies and resets the device in a single session.
//!
//! # Modules
//!
//! - [`config`]: explicit run configuration (`BuildConfig`, `AdapterConfig`)
//! - [`error`]: `PipelineError` taxonomy and exit codes
//! - [`compiler`]: Compiler Stage and the `Toolchain` seam
//! - [`script`]: the single adapter command script
//! - [`progress`]: Flash Stage state machine
//! - [`session`]: adapter tool process lifecycle
//! - [`flash`]: Flash Stage and the `Adapter` seam
//! - [`orchestrator`]: the two-stage `Pipeline`

pub mod compiler;
pub mod config;
pub mod error;
pub mod flash;
pub mod orchestrator;
pub mod progress;
pub mod script;
pub mod session;

// Top-level re-exports for convenience
pub use compiler::{compile, BuildArtifact, Cargo, CompiledBinary, Toolchain};
pub use config::{AdapterConfig, BuildConfig, PipelineConfig, Profile};
pub use error::{PipelineError, Stage};
pub use flash::{Adapter, FlashReport, OpenOcd};
pub use orchestrator::{Deployment, Observer, Pipeline, Plan};
pub use progress::{FlashProgress, FlashState};
