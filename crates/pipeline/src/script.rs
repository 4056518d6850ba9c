//! OpenOCD command script.
//!
//! The whole Flash Stage is a single `-c` script so that the adapter tool
//! runs program, reset and exit inside one session. `reset` and `exit` are
//! always the last two words, in that order.

use std::ffi::OsString;
use std::path::Path;

use crate::config::AdapterConfig;

/// `program <artifact> [verify] reset exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandScript {
    artifact: String,
    verify: bool,
}

impl CommandScript {
    /// Script programming `artifact`, verifying when `verify` is set.
    pub fn program(artifact: &Path, verify: bool) -> Self {
        Self {
            artifact: tcl_word(&artifact.to_string_lossy()),
            verify,
        }
    }

    /// Words of the script, in order.
    pub fn words(&self) -> Vec<&str> {
        let mut words = vec!["program", self.artifact.as_str()];
        if self.verify {
            words.push("verify");
        }
        words.push("reset");
        words.push("exit");
        words
    }

    /// The `-c` argument.
    pub fn render(&self) -> String {
        self.words().join(" ")
    }
}

impl core::fmt::Display for CommandScript {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Quote `raw` as one Tcl word.
///
/// OpenOCD wants forward slashes even on Windows. Braces suppress every
/// substitution, so they are only added when the path needs them. A path
/// that itself contains braces is backslash-escaped instead.
fn tcl_word(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    let special = |c: char| {
        c.is_whitespace() || matches!(c, '{' | '}' | '[' | ']' | '$' | '"' | ';' | '#')
    };
    if normalized.is_empty() {
        return "{}".to_string();
    }
    if normalized.contains(|c: char| c == '{' || c == '}') {
        let mut escaped = String::with_capacity(normalized.len().saturating_mul(2));
        for c in normalized.chars() {
            if special(c) {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        return escaped;
    }
    if normalized.contains(special) {
        format!("{{{normalized}}}")
    } else {
        normalized
    }
}

/// Full adapter tool argument list: `-f <cfg>`… then `-c <script>`.
pub fn adapter_args(adapter: &AdapterConfig, script: &CommandScript) -> Vec<OsString> {
    let mut args = Vec::with_capacity(adapter.config_files.len().saturating_mul(2).saturating_add(2));
    for file in &adapter.config_files {
        args.push(OsString::from("-f"));
        args.push(file.clone().into_os_string());
    }
    args.push(OsString::from("-c"));
    args.push(OsString::from(script.render()));
    args
}
