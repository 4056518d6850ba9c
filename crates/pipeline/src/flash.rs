//! Flash Stage.
//!
//! open session -> halt -> erase -> write -> verify -> reset -> close,
//! all driven by one adapter tool invocation. Nothing is retried.

use std::path::Path;
use std::process::Command;

use crate::compiler::BuildArtifact;
use crate::config::AdapterConfig;
use crate::error::PipelineError;
use crate::progress::{Event, FlashProgress, FlashState};
use crate::script::{adapter_args, CommandScript};
use crate::session::AdapterSession;

/// Outcome of a successful Flash Stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    /// Always [`FlashState::Done`] for a returned report.
    pub final_state: FlashState,
    /// States passed through, starting with `Idle`.
    pub history: Vec<FlashState>,
}

/// Something that can program a firmware image onto the target.
pub trait Adapter {
    /// Program `artifact`, reset the core and close the session.
    ///
    /// # Errors
    ///
    /// One of the Flash Stage errors, or [`PipelineError::ArtifactMissing`]
    /// when the artifact disappeared since the Compiler Stage.
    fn program(
        &self,
        artifact: &BuildArtifact,
        config: &AdapterConfig,
    ) -> Result<FlashReport, PipelineError>;

    /// The command line [`Adapter::program`] would run, for dry runs.
    fn command_line(&self, artifact: &Path, config: &AdapterConfig) -> Vec<String>;
}

/// OpenOCD driven with `-f <cfg> -c "program <image> verify reset exit"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOcd;

impl OpenOcd {
    fn command(artifact: &Path, config: &AdapterConfig) -> Command {
        let script = CommandScript::program(artifact, config.verify);
        let mut cmd = Command::new(&config.tool);
        cmd.args(adapter_args(config, &script));
        cmd
    }
}

impl Adapter for OpenOcd {
    fn program(
        &self,
        artifact: &BuildArtifact,
        config: &AdapterConfig,
    ) -> Result<FlashReport, PipelineError> {
        if !artifact.path.is_file() {
            return Err(PipelineError::ArtifactMissing(format!(
                "{} vanished before flashing",
                artifact.path.display()
            )));
        }

        let mut progress = FlashProgress::new();
        progress.start();
        let session = match AdapterSession::open(Self::command(&artifact.path, config)) {
            Ok(session) => session,
            Err(error) => {
                progress.apply(Event::Failure(error.clone()));
                return Err(error);
            }
        };

        for line in session.lines() {
            tracing::debug!(target: "adapter", "{line}");
            let before = progress.state();
            if let Some(Event::Failure(error)) = progress.observe(&line) {
                tracing::warn!(state = %before, kind = error.kind(), "{line}");
            }
        }

        let status = session.wait()?;
        let final_state = progress.finish(status.success())?;
        Ok(FlashReport {
            final_state,
            history: progress.history().to_vec(),
        })
    }

    fn command_line(&self, artifact: &Path, config: &AdapterConfig) -> Vec<String> {
        let cmd = Self::command(artifact, config);
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}
