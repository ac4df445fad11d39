use crate::error::WorkflowError;
use glob::{MatchOptions, Pattern};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory the fuzzing engine keeps interesting inputs in.
pub const CORPUS_DIR: &str = "corpus";
/// File name the fuzzing engine loads a custom mutator from.
pub const MUTATOR_FILE: &str = "mutator.py";

pub const CRASH_PATTERN: &str = "crash-*";
pub const OOM_PATTERN: &str = "oom-*";
pub const SLOW_UNIT_PATTERN: &str = "slow-unit-*";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// The directory all artifacts of a fuzzing campaign live in.
///
/// Relative paths handed to the tool are interpreted against `root`, and every
/// child process runs with `root` as its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn current() -> Self {
        Self::new(".")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `path` as seen from outside the workspace.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() || self.root == Path::new(".") {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Program path for a binary `bin` launched with the root as working directory.
    ///
    /// A bare name is left for the `PATH` lookup; any other relative path is made
    /// absolute so it does not depend on how the child's working directory is applied.
    pub fn program(&self, bin: &str) -> Result<PathBuf, WorkflowError> {
        let path = Path::new(bin);
        if path.is_absolute() || (path.components().count() == 1 && !bin.starts_with('.')) {
            return Ok(path.to_path_buf());
        }
        std::path::absolute(self.resolve(path))
            .map_err(|e| WorkflowError::io(format!("failed to resolve {bin}"), e))
    }

    pub fn corpus_dir(&self) -> PathBuf {
        self.root.join(CORPUS_DIR)
    }

    pub fn mutator_path(&self) -> PathBuf {
        self.root.join(MUTATOR_FILE)
    }

    /// `<bin>.profraw`, written by the instrumented binary when it exits.
    pub fn profraw(&self, bin: &str) -> PathBuf {
        self.resolve(format!("{bin}.profraw"))
    }

    /// `<bin>.profdata`, the merged profile.
    pub fn profdata(&self, bin: &str) -> PathBuf {
        self.resolve(format!("{bin}.profdata"))
    }

    /// Corpus units as `corpus/<name>`, sorted by name.
    ///
    /// An absent corpus directory yields no units.
    pub fn corpus_units(&self) -> Result<Vec<String>, WorkflowError> {
        let dir = self.corpus_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let names = utf8_names(&dir, matching_names(&dir, None, true)?);
        Ok(names
            .into_iter()
            .map(|name| format!("{CORPUS_DIR}/{name}"))
            .collect())
    }

    /// Names of the files directly in the root that match `pattern`, sorted.
    ///
    /// Names that are not valid UTF-8 cannot be handed on as text; they are
    /// logged and left out.
    pub fn root_files_matching(&self, pattern: &str) -> Result<Vec<String>, WorkflowError> {
        let pattern = Pattern::new(pattern)?;
        let names = matching_names(&self.root, Some(&pattern), false)?;
        Ok(utf8_names(&self.root, names))
    }

    /// Paths of the files directly in the root that match `pattern`, sorted.
    ///
    /// Unlike [`Workspace::root_files_matching`] this includes names that are
    /// not valid UTF-8, matched on their lossy rendering.
    pub fn root_paths_matching(&self, pattern: &str) -> Result<Vec<PathBuf>, WorkflowError> {
        let pattern = Pattern::new(pattern)?;
        let names = matching_names(&self.root, Some(&pattern), false)?;
        Ok(names.into_iter().map(|name| self.root.join(name)).collect())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::current()
    }
}

fn matching_names(
    dir: &Path,
    pattern: Option<&Pattern>,
    include_dirs: bool,
) -> Result<Vec<OsString>, WorkflowError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| WorkflowError::io(format!("failed to list {}", dir.display()), e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| WorkflowError::io(format!("failed to list {}", dir.display()), e))?;
        let name = entry.file_name();
        let lossy = name.to_string_lossy();
        let matched = match pattern {
            Some(pattern) => pattern.matches_with(&lossy, MATCH_OPTIONS),
            None => !lossy.starts_with('.'),
        };
        if !matched {
            continue;
        }
        if !include_dirs && entry.path().is_dir() {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn utf8_names(dir: &Path, names: Vec<OsString>) -> Vec<String> {
    names
        .into_iter()
        .filter_map(|name| match name.into_string() {
            Ok(name) => Some(name),
            Err(name) => {
                warn!(dir = %dir.display(), name = ?name, "skipping file name that is not UTF-8");
                None
            }
        })
        .collect()
}
