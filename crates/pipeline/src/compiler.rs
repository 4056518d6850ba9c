//! Compiler Stage.
//!
//! Runs `cargo build` for the configured triple and profile, reads cargo's
//! JSON message stream to learn which executable this very build produced,
//! and only then adopts the file at the deterministic artifact path.
//!
//! The stage never deletes or rewrites anything under the output root. A
//! failed build returns an error and the orchestrator stops; whatever cargo
//! left on disk is never handed to the Flash Stage.

use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::BuildConfig;
use crate::error::PipelineError;
use crate::session::read_line_lossy;

/// `e_machine` value for 32-bit ARM.
const EM_ARM: u16 = 40;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Output lines cargo/rustc print when the target's `core` is not installed.
const MISSING_TARGET_MARKERS: [&str; 2] = [
    "target may not be installed",
    "can't find crate for `core`",
];

/// The executable a build reported, before any validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBinary {
    /// Binary target name.
    pub project: String,
    /// Path cargo reported for the executable.
    pub path: PathBuf,
    /// Cargo reused the previous output (source unchanged).
    pub fresh: bool,
}

/// A validated firmware image, handed to the Flash Stage by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Binary target name.
    pub project: String,
    /// `<output-root>/<target-triple>/<profile>/<project>`.
    pub path: PathBuf,
    /// Cargo reused the previous output.
    pub fresh: bool,
    /// Image size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of the image.
    pub digest: String,
}

/// Something that can turn a source tree into a firmware binary.
pub trait Toolchain {
    /// Compile according to `config` and report the executable produced.
    ///
    /// # Errors
    ///
    /// [`PipelineError::CompileError`] when the build fails for any reason,
    /// [`PipelineError::ArtifactMissing`] when it succeeds without reporting
    /// the expected binary.
    fn build(&self, config: &BuildConfig) -> Result<CompiledBinary, PipelineError>;

    /// The command line [`Toolchain::build`] would run, for dry runs.
    fn command_line(&self, config: &BuildConfig) -> Vec<String>;
}

/// `cargo build` with `--message-format=json-render-diagnostics`.
#[derive(Debug, Clone)]
pub struct Cargo {
    program: OsString,
}

impl Cargo {
    /// Use the given cargo executable.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `$CARGO` when running under cargo, otherwise `cargo` from `PATH`.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("CARGO").unwrap_or_else(|| OsString::from("cargo")))
    }

    fn args(config: &BuildConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "build".into(),
            "--target".into(),
            config.target_triple.clone().into(),
        ];
        args.extend(config.profile.cargo_args().into_iter().map(OsString::from));
        args.push("--target-dir".into());
        args.push(config.output_root.clone().into_os_string());
        if let Some(project) = &config.project {
            args.push("--bin".into());
            args.push(project.into());
        }
        if !config.features.is_empty() {
            args.push("--features".into());
            args.push(config.features.join(",").into());
        }
        if config.no_default_features {
            args.push("--no-default-features".into());
        }
        args.push("--message-format=json-render-diagnostics".into());
        args
    }

    fn command(&self, config: &BuildConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(config)).current_dir(&config.manifest_dir);
        cmd
    }
}

impl Default for Cargo {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Toolchain for Cargo {
    fn build(&self, config: &BuildConfig) -> Result<CompiledBinary, PipelineError> {
        let program = PathBuf::from(&self.program);
        tracing::debug!(command = ?self.command_line(config), "spawning cargo");

        let mut child = self
            .command(config)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::CompileError(format!("failed to run {}: {e}", program.display()))
            })?;

        // Diagnostics go straight back to the operator; we only watch them
        // for the missing-target case.
        let diagnostics = child
            .stderr
            .take()
            .map(|stderr| thread::spawn(move || forward_diagnostics(BufReader::new(stderr))));

        let messages = match child.stdout.take() {
            Some(stdout) => parse_messages(BufReader::new(stdout)),
            None => Err(io::Error::other("cargo stdout not captured")),
        };

        let status = child
            .wait()
            .map_err(|e| PipelineError::CompileError(format!("failed to wait for cargo: {e}")))?;
        let missing_target = diagnostics
            .map(|handle| handle.join().unwrap_or(false))
            .unwrap_or(false);

        if missing_target {
            return Err(PipelineError::CompileError(format!(
                "target {triple} is not installed (run `rustup target add {triple}`)",
                triple = config.target_triple
            )));
        }
        if !status.success() {
            return Err(PipelineError::CompileError(format!(
                "cargo build exited with {status}"
            )));
        }

        let messages = messages.map_err(|e| {
            PipelineError::CompileError(format!("failed to read cargo output: {e}"))
        })?;
        if messages.finished == Some(false) {
            return Err(PipelineError::CompileError(
                "cargo reported an unsuccessful build".to_string(),
            ));
        }

        messages.select(config.project.as_deref())
    }

    fn command_line(&self, config: &BuildConfig) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(
                Self::args(config)
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned()),
            )
            .collect()
    }
}

fn forward_diagnostics(mut reader: impl BufRead) -> bool {
    let mut missing_target = false;
    let mut buf = Vec::new();
    while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf) {
        if MISSING_TARGET_MARKERS.iter().any(|m| line.contains(m)) {
            missing_target = true;
        }
        eprintln!("{line}");
    }
    missing_target
}

#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
enum Message {
    CompilerArtifact(ArtifactMessage),
    BuildFinished {
        success: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ArtifactMessage {
    target: TargetInfo,
    executable: Option<PathBuf>,
    #[serde(default)]
    fresh: bool,
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
}

/// What a cargo JSON message stream said about one build.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildMessages {
    /// Binary executables reported by `compiler-artifact` messages.
    pub executables: Vec<CompiledBinary>,
    /// `success` flag of the final `build-finished` message, if one arrived.
    pub finished: Option<bool>,
}

impl BuildMessages {
    /// Pick the executable for `project`, or the only binary when `None`.
    ///
    /// An executable cargo did not report for this build is never adopted.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ArtifactMissing`] when nothing matches,
    /// [`PipelineError::Config`] when several binaries exist and none was named.
    pub fn select(self, project: Option<&str>) -> Result<CompiledBinary, PipelineError> {
        let mut executables = self.executables;
        match project {
            Some(name) => executables
                .into_iter()
                .rev()
                .find(|bin| bin.project == name)
                .ok_or_else(|| {
                    PipelineError::ArtifactMissing(format!(
                        "cargo did not report binary `{name}` for this build"
                    ))
                }),
            None => match executables.len() {
                0 => Err(PipelineError::ArtifactMissing(
                    "cargo did not report any binary for this build".to_string(),
                )),
                1 => executables.pop().ok_or_else(|| {
                    PipelineError::ArtifactMissing("no binary reported".to_string())
                }),
                _ => {
                    let names: Vec<String> =
                        executables.into_iter().map(|bin| bin.project).collect();
                    Err(PipelineError::Config(format!(
                        "several binaries built ({}), select one with --bin",
                        names.join(", ")
                    )))
                }
            },
        }
    }
}

/// Read cargo's `--message-format=json` output.
///
/// Lines that are not JSON objects, and message kinds other than
/// `compiler-artifact` and `build-finished`, are skipped.
///
/// # Errors
///
/// Only I/O errors from `reader`.
pub fn parse_messages(mut reader: impl BufRead) -> io::Result<BuildMessages> {
    let mut out = BuildMessages::default();
    let mut buf = Vec::new();
    while let Some(line) = read_line_lossy(&mut reader, &mut buf)? {
        if !line.trim_start().starts_with('{') {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(Message::CompilerArtifact(artifact)) => {
                let is_bin = artifact.target.kind.iter().any(|k| k == "bin");
                if let (true, Some(path)) = (is_bin, artifact.executable) {
                    tracing::debug!(bin = %artifact.target.name, fresh = artifact.fresh, "artifact");
                    out.executables.push(CompiledBinary {
                        project: artifact.target.name,
                        path,
                        fresh: artifact.fresh,
                    });
                }
            }
            Ok(Message::BuildFinished { success }) => out.finished = Some(success),
            Ok(Message::Other) => {}
            Err(e) => tracing::debug!(error = %e, "skipping unparsable cargo message"),
        }
    }
    Ok(out)
}

/// Run the Compiler Stage: build, then adopt the artifact at the
/// deterministic path only if this build produced it.
///
/// # Errors
///
/// Any error from the toolchain, or [`PipelineError::ArtifactMissing`] when
/// the reported executable is not the expected, readable firmware image.
pub fn compile<T: Toolchain + ?Sized>(
    toolchain: &T,
    config: &BuildConfig,
) -> Result<BuildArtifact, PipelineError> {
    let compiled = toolchain.build(config)?;
    let expected = config.artifact_path(&compiled.project);

    if !same_file(&compiled.path, &expected) {
        return Err(PipelineError::ArtifactMissing(format!(
            "build produced {} but the artifact path is {}",
            compiled.path.display(),
            expected.display()
        )));
    }

    let image = fs::read(&expected).map_err(|e| {
        PipelineError::ArtifactMissing(format!("cannot read {}: {e}", expected.display()))
    })?;
    check_image(&image, &config.target_triple).map_err(|reason| {
        PipelineError::ArtifactMissing(format!("{}: {reason}", expected.display()))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&image);
    let digest = format!("{:x}", hasher.finalize());

    Ok(BuildArtifact {
        project: compiled.project,
        path: expected,
        fresh: compiled.fresh,
        size: image.len() as u64,
        digest,
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Check that `image` is an ELF executable plausible for `target_triple`.
///
/// ARM triples (`thumb*`, `arm*`) additionally require a 32-bit
/// little-endian ARM header.
///
/// # Errors
///
/// A short reason when the image is rejected.
pub fn check_image(image: &[u8], target_triple: &str) -> Result<(), &'static str> {
    if image.get(..4) != Some(ELF_MAGIC.as_slice()) {
        return Err("not an ELF image");
    }
    if !(target_triple.starts_with("thumb") || target_triple.starts_with("arm")) {
        return Ok(());
    }
    // EI_CLASS = ELFCLASS32, EI_DATA = ELFDATA2LSB
    if image.get(4) != Some(&1) || image.get(5) != Some(&1) {
        return Err("not a 32-bit little-endian ELF image");
    }
    match image.get(18..20) {
        Some(&[lo, hi]) if u16::from_le_bytes([lo, hi]) == EM_ARM => Ok(()),
        Some(_) => Err("ELF image is not for ARM"),
        None => Err("truncated ELF header"),
    }
}
