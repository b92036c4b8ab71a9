//! Decide how a step's executable is actually invoked on this host.
//!
//! Windows tools (`.exe`) on a non-Windows host run under a compatibility
//! wrapper (wine by default). Host-absolute arguments are rewritten onto the
//! wrapper's `Z:` drive so the tool does not mistake them for paths relative
//! to its working directory.

use std::path::{Path, PathBuf};

/// Extension that marks a Windows executable.
const FOREIGN_EXTENSION: &str = ".exe";

/// Drive the wrapper maps the host root onto.
const FOREIGN_ROOT: &str = "Z:\\";

/// Silences wrapper diagnostics that would otherwise flood the output stream.
const WRAPPER_ENV: (&str, &str) = ("WINEDEBUG", "-all");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    Windows,
    Unix,
}

impl Host {
    pub fn current() -> Self {
        if cfg!(windows) {
            Host::Windows
        } else {
            Host::Unix
        }
    }
}

/// Fully resolved command line handed to the step executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub wrapped: bool,
}

impl Invocation {
    /// Arguments rendered as a JSON array, as reported to the peer.
    pub fn args_json(&self) -> String {
        if self.args.is_empty() {
            return String::new();
        }
        serde_json::to_string(&self.args).unwrap_or_default()
    }
}

pub fn is_foreign_binary(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(FOREIGN_EXTENSION)
}

pub fn needs_wrapper(path: &str, host: Host) -> bool {
    host != Host::Windows && is_foreign_binary(path)
}

/// Map a host-rooted path onto the wrapper drive: `/a/b` -> `Z:\a\b`.
/// Anything not rooted at `/` passes through unchanged.
pub fn to_foreign_path(arg: &str) -> String {
    match arg.strip_prefix('/') {
        Some(rest) => format!("{}{}", FOREIGN_ROOT, rest.replace('/', "\\")),
        None => arg.to_string(),
    }
}

/// Windows tools run from their own directory so co-located DLLs resolve;
/// everything else runs from the input's directory.
pub fn working_dir(executable: &str, input_dir: &str) -> PathBuf {
    if is_foreign_binary(executable) {
        Path::new(executable)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    } else {
        PathBuf::from(input_dir)
    }
}

pub fn plan(
    executable: &str,
    args: Vec<String>,
    input_dir: &str,
    wrapper: &str,
    host: Host,
) -> Invocation {
    let working_dir = working_dir(executable, input_dir);

    if !needs_wrapper(executable, host) {
        return Invocation {
            program: executable.to_string(),
            args,
            working_dir,
            env: Vec::new(),
            wrapped: false,
        };
    }

    let mut wrapped_args = Vec::with_capacity(args.len() + 1);
    wrapped_args.push(executable.to_string());
    wrapped_args.extend(args.iter().map(|a| to_foreign_path(a)));

    Invocation {
        program: wrapper.to_string(),
        args: wrapped_args,
        working_dir,
        env: vec![(WRAPPER_ENV.0.to_string(), WRAPPER_ENV.1.to_string())],
        wrapped: true,
    }
}
