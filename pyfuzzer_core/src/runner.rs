use crate::error::{ExitDescription, RunError};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// A fully described external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Added to the inherited environment of the child.
    pub envs: Vec<(String, String)>,
    /// Bytes written to the child's stdin; stdin is inherited when `None`.
    pub stdin: Option<Vec<u8>>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Executes invocations to completion.
pub trait CommandRunner {
    /// Runs `invocation` and fails unless it exits successfully.
    fn run(&mut self, invocation: &Invocation) -> Result<(), RunError>;
}

/// Runs invocations as child processes sharing this process' stdout and stderr.
///
/// The command line is echoed to stdout before the child starts.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    quiet: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that does not echo command lines.
    #[cfg(test)]
    pub(crate) fn quiet() -> Self {
        Self { quiet: true }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<(), RunError> {
        let command_line = invocation.to_string();
        if !self.quiet {
            println!("{command_line}");
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.envs(invocation.envs.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &invocation.current_dir {
            cmd.current_dir(cwd);
        }
        if invocation.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        debug!(pid = child.id(), command = %command_line, "spawned");

        if let Some(input) = &invocation.stdin {
            if let Some(mut child_stdin) = child.stdin.take() {
                // A child that exits without reading its input closes the pipe;
                // its exit status is what matters then.
                if let Err(source) = child_stdin.write_all(input) {
                    if source.kind() != std::io::ErrorKind::BrokenPipe {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(RunError::Stdin {
                            command: command_line,
                            source,
                        });
                    }
                }
            }
        }

        let status = child.wait().map_err(|source| RunError::Wait {
            command: command_line.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(RunError::NonZeroExit {
                command: command_line,
                status: ExitDescription::from(status),
            })
        }
    }
}

/// Records invocations instead of running them, failing the ones selected by `fail_when`.
#[cfg(test)]
pub(crate) struct RecordingRunner {
    pub invocations: Vec<Invocation>,
    pub fail_when: Box<dyn Fn(&Invocation) -> bool>,
    /// Called before each invocation is recorded, e.g. to fake tool output on disk.
    pub on_run: Box<dyn Fn(&Invocation)>,
    /// Fail every invocation as if its program did not exist.
    pub spawn_fails: bool,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            invocations: Vec::new(),
            fail_when: Box::new(|_| false),
            on_run: Box::new(|_| {}),
            spawn_fails: false,
        }
    }

    pub fn unspawnable() -> Self {
        Self {
            spawn_fails: true,
            ..Self::new()
        }
    }

    pub fn failing_when(fail_when: impl Fn(&Invocation) -> bool + 'static) -> Self {
        Self {
            fail_when: Box::new(fail_when),
            ..Self::new()
        }
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<(), RunError> {
        (self.on_run)(invocation);
        self.invocations.push(invocation.clone());
        if self.spawn_fails {
            Err(RunError::Spawn {
                command: invocation.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        } else if (self.fail_when)(invocation) {
            Err(RunError::NonZeroExit {
                command: invocation.to_string(),
                status: ExitDescription {
                    code: Some(1),
                    signal: None,
                },
            })
        } else {
            Ok(())
        }
    }
}
