use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Errors raised while assembling the configuration of a session.
///
/// These are fatal for the invocation; the environment is assumed not to change
/// while the process runs, so nothing is retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The runtime interpreter could not be started to query host build metadata.
    #[error("failed to query host build metadata with '{interpreter}': {source}")]
    HostQuerySpawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime interpreter ran but reported a failure.
    #[error("host build metadata query with '{interpreter}' failed ({status}): {stderr}")]
    HostQueryFailed {
        interpreter: String,
        status: ExitDescription,
        stderr: String,
    },

    /// The interpreter printed something that is not the expected metadata document.
    #[error("malformed host build metadata: {0}")]
    HostMetadata(#[from] serde_json::Error),

    #[error("failed to read config file {path:?}: {source}")]
    ConfigFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    ConfigFileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors raised by the process runner.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write input to command '{command}': {source}")]
    Stdin {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for command '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child terminated without success.
    #[error("command '{command}' {status}")]
    NonZeroExit {
        command: String,
        status: ExitDescription,
    },
}

impl RunError {
    /// Exit code of the child, if it exited on its own with one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunError::NonZeroExit { status, .. } => status.code,
            _ => None,
        }
    }
}

/// Errors surfaced by the workflow commands.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunError),

    /// Profile data expected from a previous stage does not exist.
    #[error("profile data {0:?} not found (run the fuzzer first)")]
    MissingProfile(PathBuf),

    /// A C shim compiled into the binaries is not where the shim directory points.
    #[error("shim source {0:?} not found (point PYFUZZER_SHIM_DIR or shim-dir at the pyfuzzer shims)")]
    MissingShim(PathBuf),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkflowError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WorkflowError::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit code the process should report for this failure, when a child
    /// process exited non-zero with a code.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            WorkflowError::Run(err) => err.exit_code(),
            _ => None,
        }
    }
}

/// How a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDescription {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitDescription {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => write!(f, "exited abnormally"),
        }
    }
}
