//! Flash Stage against a scripted stand-in for OpenOCD.
//!
//! The adapter tool is set to `sh` and the "adapter configuration" is a
//! shell script: `sh -f fake.cfg -c "<script>"` runs `fake.cfg` with the
//! command script in `$2`. That exercises the real process handling,
//! output classification and exit-status mapping of `OpenOcd`.
//!
//! Everything goes to stderr, as OpenOCD does, so line order is preserved.

#![cfg(unix)]
// Test files legitimately use unwrap()/expect() for readable assertions.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::fs;
use std::path::{Path, PathBuf};

use pipeline::{Adapter, AdapterConfig, BuildArtifact, FlashState, OpenOcd, PipelineError};
use tempfile::TempDir;

const PROGRAM_OK: &str = r#"
echo "Open On-Chip Debugger 0.12.0" >&2
echo "Info : STLINK V2J37S7 (API v2) VID:PID 0483:3748" >&2
echo "target halted due to debug-request, current mode: Thread" >&2
echo "** Programming Started **" >&2
echo "** Programming Finished **" >&2
echo "** Verify Started **" >&2
echo "** Verified OK **" >&2
echo "** Resetting Target **" >&2
echo "shutdown command invoked" >&2
exit 0
"#;

struct Bench {
    dir: TempDir,
    artifact: BuildArtifact,
}

impl Bench {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game");
        fs::write(&path, b"\x7fELF firmware").unwrap();
        let artifact = BuildArtifact {
            project: "game".into(),
            path,
            fresh: false,
            size: 13,
            digest: String::new(),
        };
        Self { dir, artifact }
    }

    /// Adapter config running `body` as the fake tool.
    fn adapter(&self, body: &str) -> AdapterConfig {
        let script = self.dir.path().join("fake.cfg");
        let recorder = format!(
            "printf '%s\\n' \"$2\" > '{}'\n",
            self.received_path().display()
        );
        fs::write(&script, format!("{recorder}{body}")).unwrap();
        AdapterConfig {
            tool: PathBuf::from("sh"),
            config_files: vec![script],
            verify: true,
        }
    }

    fn received_path(&self) -> PathBuf {
        self.dir.path().join("received")
    }

    fn received(&self) -> String {
        fs::read_to_string(self.received_path()).unwrap()
    }
}

#[test]
fn successful_program_walks_the_state_machine() {
    let bench = Bench::new();
    let config = bench.adapter(PROGRAM_OK);

    let report = OpenOcd.program(&bench.artifact, &config).unwrap();

    assert_eq!(report.final_state, FlashState::Done);
    for state in [
        FlashState::Connecting,
        FlashState::Halted,
        FlashState::Erasing,
        FlashState::Writing,
        FlashState::Verifying,
        FlashState::Resetting,
    ] {
        assert!(report.history.contains(&state), "missing {state} in {:?}", report.history);
    }
}

#[test]
fn one_command_script_ends_with_reset_exit() {
    let bench = Bench::new();
    let config = bench.adapter(PROGRAM_OK);

    OpenOcd.program(&bench.artifact, &config).unwrap();

    assert_eq!(
        bench.received().trim_end(),
        format!("program {} verify reset exit", bench.artifact.path.display())
    );
}

#[test]
fn unplugged_adapter_is_adapter_unavailable() {
    let bench = Bench::new();
    let config = bench.adapter(
        r#"
echo "Error: open failed" >&2
echo "** OpenOCD init failed **" >&2
echo "shutdown command invoked" >&2
exit 1
"#,
    );

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::AdapterUnavailable(_)), "{err}");
    assert!(bench.artifact.path.is_file(), "artifact must not be deleted");
}

#[test]
fn verify_failure_is_write_verify_mismatch() {
    let bench = Bench::new();
    let config = bench.adapter(
        r#"
echo "target halted due to debug-request" >&2
echo "** Programming Started **" >&2
echo "** Programming Finished **" >&2
echo "** Verify Started **" >&2
echo "** Verify Failed **" >&2
echo "shutdown command invoked" >&2
exit 1
"#,
    );

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::WriteVerifyMismatch(_)), "{err}");
}

#[test]
fn halt_timeout_is_halt_failure() {
    let bench = Bench::new();
    let config = bench.adapter(
        r#"
echo "Error: timed out while waiting for target halted" >&2
echo "** Unable to reset target **" >&2
exit 1
"#,
    );

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::HaltFailure(_)), "{err}");
}

#[test]
fn silent_crash_is_attributed_to_current_state() {
    let bench = Bench::new();
    let config = bench.adapter(
        r#"
echo "target halted due to debug-request" >&2
echo "** Programming Started **" >&2
exit 1
"#,
    );

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::EraseFailure(_)), "{err}");
}

#[test]
fn missing_tool_is_adapter_unavailable() {
    let bench = Bench::new();
    let mut config = bench.adapter(PROGRAM_OK);
    config.tool = PathBuf::from("/nonexistent/openocd");

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::AdapterUnavailable(_)), "{err}");
}

#[test]
fn vanished_artifact_never_opens_a_session() {
    let bench = Bench::new();
    let config = bench.adapter(PROGRAM_OK);
    let mut artifact = bench.artifact.clone();
    artifact.path = Path::new("/nonexistent/thumbv7em-none-eabihf/release/game").to_path_buf();

    let err = OpenOcd.program(&artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::ArtifactMissing(_)), "{err}");
    assert!(!bench.received_path().exists(), "adapter tool must not run");
}

#[test]
fn invalid_utf8_output_does_not_end_the_session() {
    let bench = Bench::new();
    let config = bench.adapter(&format!(
        "printf 'Info : path \\377\\n' >&2\n{}",
        PROGRAM_OK
    ));

    let report = OpenOcd.program(&bench.artifact, &config).unwrap();

    assert_eq!(report.final_state, FlashState::Done);
    assert!(report.history.contains(&FlashState::Resetting));
}

#[test]
fn clean_exit_without_reset_is_not_done() {
    let bench = Bench::new();
    let config = bench.adapter(
        r#"
echo "target halted due to debug-request" >&2
echo "** Programming Started **" >&2
exit 0
"#,
    );

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::EraseFailure(_)), "{err}");
}

#[test]
fn unreadable_image_is_artifact_missing() {
    let bench = Bench::new();
    let config = bench.adapter(
        r#"
echo "target halted due to debug-request" >&2
echo "Error: couldn't open $2" >&2
echo "** Programming Failed **" >&2
exit 1
"#,
    );

    let err = OpenOcd.program(&bench.artifact, &config).unwrap_err();

    assert!(matches!(err, PipelineError::ArtifactMissing(_)), "{err}");
}
