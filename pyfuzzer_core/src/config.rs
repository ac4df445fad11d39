use crate::error::ConfigError;
use crate::host::{HostMetadata, HostProbe};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the config file looked up in the workspace root.
pub const DEFAULT_CONFIG_FILE: &str = "pyfuzzer.toml";

pub const DEFAULT_CC: &str = "clang";
pub const DEFAULT_LIB_FUZZING_ENGINE: &str = "-fsanitize=fuzzer";
pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_LLVM_PROFDATA: &str = "llvm-profdata";
pub const DEFAULT_LLVM_COV: &str = "llvm-cov";

/// Snapshot of the environment variables the tool consumes.
///
/// Taken once at startup; no stage reads the process environment afterwards.
/// Empty values are treated the same as unset ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// `CFLAGS`: replaces the default sanitizer flags of the fuzz build.
    pub cflags: Option<String>,
    /// `LDFLAGS`: appended to the host link flags.
    pub ldflags: Option<String>,
    /// `CC`
    pub cc: Option<String>,
    /// `LIB_FUZZING_ENGINE`
    pub lib_fuzzing_engine: Option<String>,
    /// `PYTHON`: interpreter queried for host build metadata.
    pub python: Option<String>,
    /// `PYFUZZER_SHIM_DIR`
    pub shim_dir: Option<PathBuf>,
    /// `LLVM_PROFDATA`
    pub llvm_profdata: Option<String>,
    /// `LLVM_COV`
    pub llvm_cov: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::default();
        for (key, value) in vars {
            let value: String = value.into();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "CFLAGS" => overrides.cflags = Some(value),
                "LDFLAGS" => overrides.ldflags = Some(value),
                "CC" => overrides.cc = Some(value),
                "LIB_FUZZING_ENGINE" => overrides.lib_fuzzing_engine = Some(value),
                "PYTHON" => overrides.python = Some(value),
                "PYFUZZER_SHIM_DIR" => overrides.shim_dir = Some(PathBuf::from(value)),
                "LLVM_PROFDATA" => overrides.llvm_profdata = Some(value),
                "LLVM_COV" => overrides.llvm_cov = Some(value),
                _ => {}
            }
        }
        overrides
    }
}

/// Optional on-disk configuration, lower precedence than the environment.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub cc: Option<String>,
    pub lib_fuzzing_engine: Option<String>,
    pub python: Option<String>,
    pub shim_dir: Option<PathBuf>,
    pub llvm_profdata: Option<String>,
    pub llvm_cov: Option<String>,
}

impl FileConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigFileRead {
                path: path.to_path_buf(),
                source,
            })?;

        toml::from_str(&content).map_err(|source| ConfigError::ConfigFileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `explicit` if given, otherwise `pyfuzzer.toml` in `root` when present.
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = root.join(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    debug!(path = %default_path.display(), "loading config file");
                    Self::load_from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Directory holding the C shims compiled into both binaries.
pub fn default_shim_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("shims")
}

/// Merged tool settings: environment, then config file, then defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub compiler: String,
    pub user_cflags: Option<String>,
    pub user_ldflags: Option<String>,
    pub fuzzing_engine_flag: String,
    pub python: String,
    pub shim_dir: PathBuf,
    pub llvm_profdata: String,
    pub llvm_cov: String,
}

impl Settings {
    pub fn merge(env: EnvOverrides, file: FileConfig) -> Self {
        Self {
            compiler: env
                .cc
                .or(file.cc)
                .unwrap_or_else(|| DEFAULT_CC.to_string()),
            user_cflags: env.cflags,
            user_ldflags: env.ldflags,
            fuzzing_engine_flag: env
                .lib_fuzzing_engine
                .or(file.lib_fuzzing_engine)
                .unwrap_or_else(|| DEFAULT_LIB_FUZZING_ENGINE.to_string()),
            python: env
                .python
                .or(file.python)
                .unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            shim_dir: env
                .shim_dir
                .or(file.shim_dir)
                .unwrap_or_else(default_shim_dir),
            llvm_profdata: env
                .llvm_profdata
                .or(file.llvm_profdata)
                .unwrap_or_else(|| DEFAULT_LLVM_PROFDATA.to_string()),
            llvm_cov: env
                .llvm_cov
                .or(file.llvm_cov)
                .unwrap_or_else(|| DEFAULT_LLVM_COV.to_string()),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::merge(EnvOverrides::default(), FileConfig::default())
    }
}

/// Everything the compiler invocations need, derived once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub compiler: String,
    /// Raw `CFLAGS`; when set it replaces the default sanitizer flags of the fuzz build.
    pub user_flags: Option<String>,
    pub include_paths: Vec<String>,
    pub link_flags: Vec<String>,
    pub fuzzing_engine_flag: String,
    pub shim_dir: PathBuf,
}

impl BuildConfig {
    /// Queries the host through `probe` and derives include and link flags.
    pub fn resolve(settings: &Settings, probe: &dyn HostProbe) -> Result<Self, ConfigError> {
        let metadata = probe.query()?;
        let config = Self::from_metadata(settings, &metadata);
        debug!(
            compiler = %config.compiler,
            include_paths = ?config.include_paths,
            link_flags = ?config.link_flags,
            "resolved build configuration"
        );
        Ok(config)
    }

    pub fn from_metadata(settings: &Settings, metadata: &HostMetadata) -> Self {
        Self {
            compiler: settings.compiler.clone(),
            user_flags: settings.user_cflags.clone(),
            include_paths: vec![format!("-I{}", metadata.include)],
            link_flags: metadata.link_flags(settings.user_ldflags.as_deref()),
            fuzzing_engine_flag: settings.fuzzing_engine_flag.clone(),
            shim_dir: settings.shim_dir.clone(),
        }
    }

    /// `user_flags` split on whitespace, if any were given.
    pub fn user_flag_list(&self) -> Option<Vec<String>> {
        self.user_flags
            .as_deref()
            .map(|flags| flags.split_whitespace().map(str::to_string).collect())
    }
}
