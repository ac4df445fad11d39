pub mod command;
pub mod config;
pub mod error;
pub mod host;
pub mod runner;
pub mod workflow;
pub mod workspace;

pub use command::{BuildMode, CompileSpec, compile_command};
pub use config::{BuildConfig, EnvOverrides, FileConfig, Settings};
pub use error::{ConfigError, RunError, WorkflowError};
pub use host::{HostMetadata, HostProbe, PythonProbe};
pub use runner::{CommandRunner, Invocation, ProcessRunner};
pub use workflow::{BuildOptions, CrashSummary, RunOptions};
pub use workspace::Workspace;
