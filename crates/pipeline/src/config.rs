//! Run configuration.
//!
//! Toolchain and adapter settings are plain values built once by the caller
//! and passed by reference into each stage. Nothing here is global and
//! nothing is mutated while a run is in progress.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Cortex-M4F/M7F, hardware floating point, no OS.
pub const DEFAULT_TARGET_TRIPLE: &str = "thumbv7em-none-eabihf";

/// Adapter tool executable looked up on `PATH`.
pub const DEFAULT_ADAPTER_TOOL: &str = "openocd";

/// Adapter configuration file, relative to the firmware manifest directory.
pub const DEFAULT_ADAPTER_CONFIG: &str = "openocd.cfg";

/// Output directory name cargo uses when `--target-dir` is not overridden.
pub const DEFAULT_OUTPUT_DIR: &str = "target";

/// Cargo build profile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Profile {
    /// `dev` profile, written to `debug/`.
    Dev,
    /// `release` profile (optimized).
    #[default]
    Release,
    /// Any other named profile from the firmware manifest.
    Custom(String),
}

impl Profile {
    /// Parse a profile name as cargo spells it.
    pub fn from_name(name: &str) -> Self {
        match name {
            "dev" | "debug" => Profile::Dev,
            "release" => Profile::Release,
            other => Profile::Custom(other.to_string()),
        }
    }

    /// Directory under `<output-root>/<triple>/` the profile writes to.
    pub fn dir_name(&self) -> &str {
        match self {
            Profile::Dev => "debug",
            Profile::Release => "release",
            Profile::Custom(name) => name,
        }
    }

    /// Flags selecting this profile on the cargo command line.
    pub fn cargo_args(&self) -> Vec<String> {
        match self {
            Profile::Dev => Vec::new(),
            Profile::Release => vec!["--release".to_string()],
            Profile::Custom(name) => vec!["--profile".to_string(), name.clone()],
        }
    }
}

/// Compiler Stage inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Directory holding the firmware `Cargo.toml`.
    pub manifest_dir: PathBuf,
    /// Target triple, e.g. `thumbv7em-none-eabihf`.
    pub target_triple: String,
    /// Build profile.
    pub profile: Profile,
    /// Binary target name. `None` adopts the single binary cargo reports.
    pub project: Option<String>,
    /// Output root passed to cargo as `--target-dir`.
    pub output_root: PathBuf,
    /// Extra cargo features.
    pub features: Vec<String>,
    /// Pass `--no-default-features`.
    pub no_default_features: bool,
}

impl BuildConfig {
    /// Release build for the default triple, output under `<manifest_dir>/target`.
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        let manifest_dir = manifest_dir.into();
        let output_root = manifest_dir.join(DEFAULT_OUTPUT_DIR);
        Self {
            manifest_dir,
            target_triple: DEFAULT_TARGET_TRIPLE.to_string(),
            profile: Profile::Release,
            project: None,
            output_root,
            features: Vec::new(),
            no_default_features: false,
        }
    }

    /// `<output-root>/<target-triple>/<profile>/<project>`.
    ///
    /// This is the only handoff channel between the two stages.
    pub fn artifact_path(&self, project: &str) -> PathBuf {
        self.output_root
            .join(&self.target_triple)
            .join(self.profile.dir_name())
            .join(project)
    }

    /// Reject configurations the Compiler Stage cannot act on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] naming the offending value.
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_name("target triple", &self.target_triple)?;
        validate_name("profile", self.profile.dir_name())?;
        if let Some(project) = &self.project {
            validate_name("binary name", project)?;
        }

        let manifest = self.manifest_dir.join("Cargo.toml");
        if !manifest.is_file() {
            return Err(PipelineError::Config(format!(
                "no Cargo.toml in {}",
                self.manifest_dir.display()
            )));
        }
        Ok(())
    }
}

/// A single path component: non-empty, no separators, no `..`.
fn validate_name(what: &str, value: &str) -> Result<(), PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::Config(format!("{what} is empty")));
    }
    if value.contains(|c: char| c == '/' || c == '\\') || value == "." || value == ".." {
        return Err(PipelineError::Config(format!(
            "{what} {value:?} is not a single path component"
        )));
    }
    Ok(())
}

/// Flash Stage inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Adapter tool executable.
    pub tool: PathBuf,
    /// Interface and target configuration files, passed with `-f` in order.
    pub config_files: Vec<PathBuf>,
    /// Include `verify` in the program command.
    pub verify: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from(DEFAULT_ADAPTER_TOOL),
            config_files: vec![PathBuf::from(DEFAULT_ADAPTER_CONFIG)],
            verify: true,
        }
    }
}

impl AdapterConfig {
    /// Check that every configuration file is present.
    ///
    /// Files are never opened or parsed here; they belong to the adapter tool.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when no file is given or one is missing.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.config_files.is_empty() {
            return Err(PipelineError::Config(
                "no adapter configuration file given".to_string(),
            ));
        }
        if self.tool.as_os_str().is_empty() {
            return Err(PipelineError::Config("adapter tool is empty".to_string()));
        }
        for file in &self.config_files {
            if !file.is_file() {
                return Err(PipelineError::Config(format!(
                    "adapter configuration {} not found",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolve relative configuration files against `base`.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        for file in &mut self.config_files {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        self
    }
}

/// Everything one run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Compiler Stage inputs.
    pub build: BuildConfig,
    /// Flash Stage inputs.
    pub adapter: AdapterConfig,
}

impl PipelineConfig {
    /// Validate both stages' inputs before anything runs.
    ///
    /// # Errors
    ///
    /// The first [`PipelineError::Config`] found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.build.validate()?;
        self.adapter.validate()
    }
}
