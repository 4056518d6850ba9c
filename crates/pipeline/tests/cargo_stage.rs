//! Compiler Stage against a scripted stand-in for cargo.
//!
//! The cargo program is `sh` and the manifest directory holds a shell
//! script named `build`, so `sh build --target ...` runs it with cargo's
//! arguments. The script prints cargo's JSON messages on stdout and
//! diagnostics on stderr, which exercises the real `Cargo` process handling.

#![cfg(unix)]
// Test files legitimately use unwrap()/expect() for readable assertions.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use pipeline::{
    compile, Adapter, AdapterConfig, BuildArtifact, BuildConfig, Cargo, FlashReport, FlashState,
    Pipeline, PipelineConfig, PipelineError,
};
use tempfile::TempDir;

fn arm_elf() -> Vec<u8> {
    let mut image = vec![0u8; 52];
    image[..4].copy_from_slice(b"\x7fELF");
    image[4] = 1;
    image[5] = 1;
    image[18..20].copy_from_slice(&40u16.to_le_bytes());
    image
}

struct Tree {
    dir: TempDir,
    config: PipelineConfig,
}

impl Tree {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"game\"\n").unwrap();
        fs::write(dir.path().join("openocd.cfg"), "source [find board/stm32f3discovery.cfg]\n")
            .unwrap();
        let config = PipelineConfig {
            build: BuildConfig::new(dir.path()),
            adapter: AdapterConfig::default().resolved_against(dir.path()),
        };
        Self { dir, config }
    }

    fn artifact_path(&self) -> PathBuf {
        self.config.build.artifact_path("game")
    }

    /// Leave a valid image where the build would put it.
    fn place_image(&self) -> PathBuf {
        let path = self.artifact_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, arm_elf()).unwrap();
        path
    }

    /// Install `body` as the cargo stand-in.
    fn cargo(&self, body: &str) -> Cargo {
        fs::write(self.dir.path().join("build"), body).unwrap();
        Cargo::new("sh")
    }
}

fn artifact_message(path: &Path) -> String {
    format!(
        r#"{{"reason":"compiler-artifact","target":{{"kind":["bin"],"name":"game"}},"executable":"{}","fresh":false}}"#,
        path.display()
    )
}

fn reports(path: &Path, success: bool) -> String {
    format!(
        "printf '%s\\n' '{}'\nprintf '%s\\n' '{{\"reason\":\"build-finished\",\"success\":{}}}'\n",
        artifact_message(path),
        success
    )
}

#[derive(Default)]
struct CountingAdapter {
    sessions: Cell<usize>,
}

impl Adapter for CountingAdapter {
    fn program(
        &self,
        _artifact: &BuildArtifact,
        _config: &AdapterConfig,
    ) -> Result<FlashReport, PipelineError> {
        self.sessions.set(self.sessions.get() + 1);
        Ok(FlashReport {
            final_state: FlashState::Done,
            history: vec![FlashState::Idle, FlashState::Done],
        })
    }

    fn command_line(&self, _artifact: &Path, _config: &AdapterConfig) -> Vec<String> {
        Vec::new()
    }
}

#[test]
fn reported_image_at_the_artifact_path_is_adopted() {
    let tree = Tree::new();
    let path = tree.place_image();
    let cargo = tree.cargo(&reports(&path, true));

    let artifact = compile(&cargo, &tree.config.build).unwrap();

    assert_eq!(artifact.path, path);
    assert_eq!(artifact.size, 52);
    assert_eq!(artifact.digest.len(), 64);
}

#[test]
fn image_reported_elsewhere_is_artifact_missing() {
    let tree = Tree::new();
    tree.place_image();
    let deps = tree.artifact_path().parent().unwrap().join("deps");
    fs::create_dir_all(&deps).unwrap();
    let other = deps.join("game-0123abcd");
    fs::write(&other, arm_elf()).unwrap();
    let cargo = tree.cargo(&reports(&other, true));

    let err = compile(&cargo, &tree.config.build).unwrap_err();

    assert!(matches!(err, PipelineError::ArtifactMissing(_)), "{err}");
}

#[test]
fn failed_build_never_reaches_the_adapter() {
    let tree = Tree::new();
    // A previous build's image is still on disk.
    tree.place_image();
    let cargo = tree.cargo(
        "echo 'error: expected `;`, found `}`' >&2\n\
         printf '%s\\n' '{\"reason\":\"build-finished\",\"success\":false}'\n\
         exit 101\n",
    );
    let pipeline = Pipeline::new(cargo, CountingAdapter::default());

    let err = pipeline.run(&tree.config).unwrap_err();

    assert!(matches!(err, PipelineError::CompileError(_)), "{err}");
    assert_eq!(err.exit_code(), 1);
    assert_eq!(pipeline.adapter().sessions.get(), 0);
}

#[test]
fn missing_target_suggests_rustup() {
    let tree = Tree::new();
    let cargo = tree.cargo(
        "echo 'error[E0463]: can'\\''t find crate for `core`' >&2\n\
         echo '  = note: the `thumbv7em-none-eabihf` target may not be installed' >&2\n\
         exit 101\n",
    );

    let err = compile(&cargo, &tree.config.build).unwrap_err();

    match err {
        PipelineError::CompileError(message) => {
            assert!(message.contains("rustup target add thumbv7em-none-eabihf"), "{message}");
        }
        other => panic!("expected CompileError, got {other}"),
    }
}

#[test]
fn unsuccessful_build_finished_is_compile_error() {
    let tree = Tree::new();
    let path = tree.place_image();
    let cargo = tree.cargo(&format!("{}exit 0\n", reports(&path, false)));

    let err = compile(&cargo, &tree.config.build).unwrap_err();

    assert!(matches!(err, PipelineError::CompileError(_)), "{err}");
}

#[test]
fn cargo_that_cannot_start_is_compile_error() {
    let tree = Tree::new();
    let cargo = Cargo::new("/nonexistent/cargo");

    let err = compile(&cargo, &tree.config.build).unwrap_err();

    assert!(matches!(err, PipelineError::CompileError(_)), "{err}");
}

#[test]
fn invalid_utf8_diagnostics_do_not_break_the_build() {
    let tree = Tree::new();
    let path = tree.place_image();
    let cargo = tree.cargo(&format!(
        "printf 'warning: \\377 in doc comment\\n' >&2\n{}",
        reports(&path, true)
    ));

    let artifact = compile(&cargo, &tree.config.build).unwrap();

    assert_eq!(artifact.path, path);
}

#[test]
fn successful_build_hands_the_artifact_to_the_adapter() {
    let tree = Tree::new();
    let path = tree.place_image();
    let cargo = tree.cargo(&reports(&path, true));
    let pipeline = Pipeline::new(cargo, CountingAdapter::default());

    let deployment = pipeline.run(&tree.config).unwrap();

    assert_eq!(deployment.artifact.path, path);
    assert_eq!(pipeline.adapter().sessions.get(), 1);
}
