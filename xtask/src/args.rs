//! Command-line options shared by the subcommands.
//!
//! Every option turns into a field of the explicit `PipelineConfig`; nothing
//! is read from the environment after this point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use pipeline::config::{DEFAULT_ADAPTER_CONFIG, DEFAULT_ADAPTER_TOOL, DEFAULT_TARGET_TRIPLE};
use pipeline::{AdapterConfig, BuildConfig, PipelineConfig, Profile};

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Directory containing the firmware Cargo.toml
    #[arg(long, env = "FW_MANIFEST_DIR", default_value = ".")]
    pub manifest_dir: PathBuf,

    /// Target triple to compile for
    #[arg(long = "target", env = "FW_TARGET", default_value = DEFAULT_TARGET_TRIPLE)]
    pub target_triple: String,

    /// Cargo profile: release, dev, or a custom profile name
    #[arg(long, env = "FW_PROFILE", default_value = "release")]
    pub profile: String,

    /// Shorthand for --profile dev
    #[arg(long, conflicts_with = "profile")]
    pub dev: bool,

    /// Binary to build and flash (defaults to the crate's only binary)
    #[arg(long = "bin", env = "FW_BIN")]
    pub bin: Option<String>,

    /// Output root passed to cargo as --target-dir [default: <manifest-dir>/target]
    #[arg(long, env = "CARGO_TARGET_DIR")]
    pub target_dir: Option<PathBuf>,

    /// Comma-separated cargo features to enable
    #[arg(long, value_delimiter = ',')]
    pub features: Vec<String>,

    /// Do not enable the firmware's default features
    #[arg(long)]
    pub no_default_features: bool,
}

impl BuildArgs {
    pub fn to_config(&self) -> Result<BuildConfig> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let mut config = BuildConfig::new(cwd.join(&self.manifest_dir));
        config.target_triple = self.target_triple.clone();
        config.profile = if self.dev {
            Profile::Dev
        } else {
            Profile::from_name(&self.profile)
        };
        config.project = self.bin.clone();
        if let Some(dir) = &self.target_dir {
            // cargo resolves a relative target dir against its own cwd,
            // which is the manifest dir, not ours.
            config.output_root = cwd.join(dir);
        }
        config.features = self.features.clone();
        config.no_default_features = self.no_default_features;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
pub struct AdapterArgs {
    /// Debug adapter tool
    #[arg(long, env = "FW_ADAPTER_TOOL", default_value = DEFAULT_ADAPTER_TOOL)]
    pub adapter_tool: PathBuf,

    /// Adapter configuration file, relative to --manifest-dir (repeatable)
    #[arg(short = 'f', long = "adapter-config", default_value = DEFAULT_ADAPTER_CONFIG)]
    pub adapter_config: Vec<PathBuf>,

    /// Program without the verify step
    #[arg(long)]
    pub no_verify: bool,
}

impl AdapterArgs {
    pub fn to_config(&self, manifest_dir: &Path) -> AdapterConfig {
        AdapterConfig {
            tool: self.adapter_tool.clone(),
            config_files: self.adapter_config.clone(),
            verify: !self.no_verify,
        }
        .resolved_against(manifest_dir)
    }
}

pub fn pipeline_config(build: &BuildArgs, adapter: &AdapterArgs) -> Result<PipelineConfig> {
    let build = build.to_config()?;
    let adapter = adapter.to_config(&build.manifest_dir);
    Ok(PipelineConfig { build, adapter })
}
