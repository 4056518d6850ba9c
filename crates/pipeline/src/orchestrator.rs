//! Orchestrator: Compiler Stage, abort gate, Flash Stage.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::compiler::{compile, BuildArtifact, Toolchain};
use crate::config::{BuildConfig, PipelineConfig};
use crate::error::{PipelineError, Stage};
use crate::flash::{Adapter, FlashReport};

/// Result of a full run: the device is running `artifact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// The image that was flashed.
    pub artifact: BuildArtifact,
    /// Flash Stage outcome.
    pub report: FlashReport,
}

/// Commands a run would execute, without executing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Compiler Stage command line.
    pub build: Vec<String>,
    /// Expected artifact path.
    pub artifact: PathBuf,
    /// Flash Stage command line.
    pub flash: Vec<String>,
}

/// Stage notifications for front ends.
///
/// All methods default to doing nothing.
pub trait Observer {
    /// A stage is about to start.
    fn stage_started(&mut self, _stage: Stage) {}

    /// The Compiler Stage produced `artifact`.
    fn compiled(&mut self, _artifact: &BuildArtifact, _elapsed: Duration) {}

    /// The Flash Stage finished successfully.
    fn flashed(&mut self, _report: &FlashReport, _elapsed: Duration) {}
}

impl Observer for () {}

/// Two-stage build-and-flash pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline<T, A> {
    toolchain: T,
    adapter: A,
}

impl<T: Toolchain, A: Adapter> Pipeline<T, A> {
    /// Pipeline compiling with `toolchain` and flashing with `adapter`.
    pub fn new(toolchain: T, adapter: A) -> Self {
        Self { toolchain, adapter }
    }

    /// The toolchain in use.
    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// The adapter in use.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Build and flash.
    ///
    /// # Errors
    ///
    /// The first error of any stage. The Flash Stage never starts when the
    /// Compiler Stage fails.
    pub fn run(&self, config: &PipelineConfig) -> Result<Deployment, PipelineError> {
        self.run_observed(config, &mut ())
    }

    /// [`Pipeline::run`] reporting stage progress to `observer`.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::run`].
    pub fn run_observed(
        &self,
        config: &PipelineConfig,
        observer: &mut dyn Observer,
    ) -> Result<Deployment, PipelineError> {
        config.validate()?;

        let artifact = self.compile_stage(&config.build, observer)?;

        observer.stage_started(Stage::Flash);
        let span = tracing::info_span!("flash", artifact = %artifact.path.display()).entered();
        let start = Instant::now();
        let report = self
            .adapter
            .program(&artifact, &config.adapter)
            .map_err(|e| {
                tracing::error!(kind = e.kind(), "{e}");
                e
            })?;
        tracing::info!(elapsed_s = start.elapsed().as_secs_f64(), "flashed");
        drop(span);
        observer.flashed(&report, start.elapsed());

        Ok(Deployment { artifact, report })
    }

    /// Run the Compiler Stage alone.
    ///
    /// # Errors
    ///
    /// Configuration or Compiler Stage errors.
    pub fn build_only(
        &self,
        config: &BuildConfig,
        observer: &mut dyn Observer,
    ) -> Result<BuildArtifact, PipelineError> {
        config.validate()?;
        self.compile_stage(config, observer)
    }

    fn compile_stage(
        &self,
        config: &BuildConfig,
        observer: &mut dyn Observer,
    ) -> Result<BuildArtifact, PipelineError> {
        observer.stage_started(Stage::Compile);
        let _span = tracing::info_span!(
            "compile",
            triple = %config.target_triple,
            profile = config.profile.dir_name()
        )
        .entered();
        let start = Instant::now();

        let artifact = compile(&self.toolchain, config).map_err(|e| {
            tracing::error!(kind = e.kind(), "{e}");
            e
        })?;

        tracing::info!(
            path = %artifact.path.display(),
            size = artifact.size,
            sha256 = %artifact.digest,
            fresh = artifact.fresh,
            "artifact ready"
        );
        observer.compiled(&artifact, start.elapsed());
        Ok(artifact)
    }

    /// The commands a run would execute.
    ///
    /// Without a configured binary name the artifact path ends in `<bin>`.
    pub fn plan(&self, config: &PipelineConfig) -> Plan {
        let project = config.build.project.as_deref().unwrap_or("<bin>");
        let artifact = config.build.artifact_path(project);
        Plan {
            build: self.toolchain.command_line(&config.build),
            flash: self.adapter.command_line(&artifact, &config.adapter),
            artifact,
        }
    }
}
