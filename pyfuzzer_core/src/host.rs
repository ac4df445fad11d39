//! Host build metadata of the runtime the extension module is linked against.

use crate::error::{ConfigError, ExitDescription};
use serde::Deserialize;
use std::process::Command;
use tracing::debug;

/// Prints the sysconfig values needed to embed the interpreter as one JSON object.
const SYSCONFIG_QUERY: &str = "import json, sysconfig
print(json.dumps({
    'include': sysconfig.get_path('include'),
    'ldflags': sysconfig.get_config_var('LDFLAGS'),
    'ldversion': sysconfig.get_config_var('LDVERSION'),
    'libdir': sysconfig.get_config_var('LIBDIR'),
    'libs': sysconfig.get_config_var('LIBS'),
}))";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostMetadata {
    /// Header directory of the runtime.
    pub include: String,
    /// Base link flags the runtime itself was linked with.
    pub ldflags: Option<String>,
    /// Version suffix of the runtime library, e.g. `3.12` or `3.12d`.
    pub ldversion: String,
    pub libdir: String,
    /// Additional libraries the runtime library depends on.
    pub libs: Option<String>,
}

impl HostMetadata {
    /// Link flags for embedding the runtime, followed by `user_ldflags`.
    pub fn link_flags(&self, user_ldflags: Option<&str>) -> Vec<String> {
        let mut flags = String::new();
        if let Some(ldflags) = &self.ldflags {
            flags.push_str(ldflags);
        }
        flags.push_str(&format!(" -lpython{}", self.ldversion));
        flags.push_str(&format!(" -L{}", self.libdir));
        if let Some(libs) = &self.libs {
            flags.push(' ');
            flags.push_str(libs);
        }
        if let Some(user) = user_ldflags {
            flags.push(' ');
            flags.push_str(user);
        }
        flags.split_whitespace().map(str::to_string).collect()
    }
}

/// Source of host build metadata.
pub trait HostProbe {
    fn query(&self) -> Result<HostMetadata, ConfigError>;
}

/// Asks a runtime interpreter for its build configuration.
#[derive(Debug, Clone)]
pub struct PythonProbe {
    interpreter: String,
}

impl PythonProbe {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl HostProbe for PythonProbe {
    fn query(&self) -> Result<HostMetadata, ConfigError> {
        debug!(interpreter = %self.interpreter, "querying host build metadata");
        let output = Command::new(&self.interpreter)
            .arg("-c")
            .arg(SYSCONFIG_QUERY)
            .output()
            .map_err(|source| ConfigError::HostQuerySpawn {
                interpreter: self.interpreter.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ConfigError::HostQueryFailed {
                interpreter: self.interpreter.clone(),
                status: ExitDescription::from(output.status),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Probe returning fixed metadata.
#[cfg(test)]
pub(crate) struct FixedProbe(pub HostMetadata);

#[cfg(test)]
impl HostProbe for FixedProbe {
    fn query(&self) -> Result<HostMetadata, ConfigError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_parses_with_missing_optional_values() {
        let json = r#"{"include": "/inc", "ldflags": null, "ldversion": "3.11", "libdir": "/lib", "libs": null}"#;
        let metadata: HostMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.link_flags(None), vec!["-lpython3.11", "-L/lib"]);
    }

    #[test]
    fn missing_interpreter_is_a_config_error() {
        let probe = PythonProbe::new("./this_interpreter_does_not_exist_12345");
        match probe.query() {
            Err(ConfigError::HostQuerySpawn { interpreter, .. }) => {
                assert!(interpreter.contains("does_not_exist"))
            }
            other => panic!("Expected HostQuerySpawn, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failing_interpreter_is_a_config_error() {
        // `false -c ...` ignores its arguments and exits 1.
        let probe = PythonProbe::new("false");
        match probe.query() {
            Err(ConfigError::HostQueryFailed { status, .. }) => assert_eq!(status.code, Some(1)),
            other => panic!("Expected HostQueryFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_json_output_is_malformed_metadata() {
        // `echo -c <script>` prints its arguments, which is not JSON.
        let probe = PythonProbe::new("echo");
        assert!(matches!(probe.query(), Err(ConfigError::HostMetadata(_))));
    }
}
