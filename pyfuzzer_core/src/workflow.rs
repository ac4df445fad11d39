//! The user-facing commands: build, run, print_coverage, print_corpus,
//! print_crashes and clean.
//!
//! Each command is a short composition of the command synthesizer, the process
//! runner and the workspace conventions. All of them fail fast except
//! [`print_crashes`], which isolates the failure of each crash unit.

use crate::command::{BuildMode, CompileSpec, compile_command, shim_sources};
use crate::config::{BuildConfig, Settings};
use crate::error::{RunError, WorkflowError};
use crate::runner::{CommandRunner, Invocation};
use crate::workspace::{CORPUS_DIR, CRASH_PATTERN, OOM_PATTERN, SLOW_UNIT_PATTERN, Workspace};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable telling the instrumented binary where to write its profile.
pub const PROFILE_FILE_ENV: &str = "LLVM_PROFILE_FILE";

/// Files left out of the coverage listing: system headers and the fuzz shim.
pub const COVERAGE_IGNORE_REGEX: &str = "/usr/|pyfuzzer.c";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub sources: Vec<String>,
    pub modinit_func: Option<String>,
    pub output: String,
    /// Skip the print binary.
    pub fuzzer_only: bool,
}

/// Compiles the fuzz binary and, unless `fuzzer_only`, the print binary.
///
/// Returns the paths of the binaries written.
pub fn build(
    workspace: &Workspace,
    config: &BuildConfig,
    options: &BuildOptions,
    runner: &mut dyn CommandRunner,
) -> Result<Vec<String>, WorkflowError> {
    let fuzz = CompileSpec::new(
        options.sources.clone(),
        options.modinit_func.clone(),
        options.output.clone(),
        BuildMode::Fuzz,
    );
    info!(entry_point = %fuzz.entry_point, output = %fuzz.output, "building fuzz binary");

    let mut specs = vec![fuzz.clone()];
    if !options.fuzzer_only {
        specs.push(fuzz.with_mode(BuildMode::Print));
    }

    for spec in &specs {
        for shim in shim_sources(spec, config) {
            if !workspace.resolve(&shim).is_file() {
                return Err(WorkflowError::MissingShim(shim));
            }
        }
    }

    let mut outputs = Vec::with_capacity(specs.len());
    for spec in &specs {
        let invocation = compile_command(spec, config).current_dir(workspace.root());
        runner.run(&invocation)?;
        outputs.push(spec.output_path());
    }
    Ok(outputs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub bin: String,
    pub mutator: Option<PathBuf>,
    /// Passed to the fuzzing engine verbatim, after the fixed arguments.
    pub libfuzzer_arguments: Vec<String>,
}

/// Runs the fuzz binary against `corpus/`.
///
/// Any profile left by an earlier session is deleted first, so the profile on
/// disk afterwards always belongs to this session.
pub fn run(
    workspace: &Workspace,
    options: &RunOptions,
    runner: &mut dyn CommandRunner,
) -> Result<(), WorkflowError> {
    if let Some(mutator) = &options.mutator {
        stage_mutator(workspace, mutator)?;
    }

    let profraw = workspace.profraw(&options.bin);
    remove_file_if_exists(&profraw)?;

    let corpus = workspace.corpus_dir();
    std::fs::create_dir_all(&corpus)
        .map_err(|e| WorkflowError::io(format!("failed to create {}", corpus.display()), e))?;

    let program = workspace.program(&options.bin)?;
    let invocation = Invocation::new(program.to_string_lossy())
        .arg(CORPUS_DIR)
        .arg("-print_final_stats=1")
        .args(options.libfuzzer_arguments.iter().cloned())
        .env(PROFILE_FILE_ENV, format!("{}.profraw", options.bin))
        .current_dir(workspace.root());

    info!(bin = %options.bin, "starting fuzzing session");
    runner.run(&invocation)?;
    Ok(())
}

/// Merges the profile of the last session and prints line coverage.
pub fn print_coverage(
    workspace: &Workspace,
    settings: &Settings,
    bin: &str,
    runner: &mut dyn CommandRunner,
) -> Result<(), WorkflowError> {
    let profraw = workspace.profraw(bin);
    if !profraw.is_file() {
        return Err(WorkflowError::MissingProfile(profraw));
    }

    let profraw_arg = format!("{bin}.profraw");
    let profdata_arg = format!("{bin}.profdata");

    let merge = Invocation::new(&settings.llvm_profdata)
        .args(["merge", "-sparse"])
        .arg(&profraw_arg)
        .arg("-o")
        .arg(&profdata_arg)
        .current_dir(workspace.root());
    runner.run(&merge)?;

    let profdata = workspace.profdata(bin);
    if !profdata.is_file() {
        return Err(WorkflowError::MissingProfile(profdata));
    }

    let show = Invocation::new(&settings.llvm_cov)
        .arg("show")
        .arg(bin)
        .arg(format!("-instr-profile={profdata_arg}"))
        .arg(format!("-ignore-filename-regex={COVERAGE_IGNORE_REGEX}"))
        .current_dir(workspace.root());
    runner.run(&show)?;
    Ok(())
}

/// Decodes corpus units with the print binary.
///
/// All unit paths are handed to a single print process, one per line; the
/// whole command fails if that process fails. Without explicit units the
/// entire `corpus/` directory is printed.
pub fn print_corpus(
    workspace: &Workspace,
    bin_print: &str,
    units: &[String],
    runner: &mut dyn CommandRunner,
) -> Result<(), WorkflowError> {
    let units = if units.is_empty() {
        workspace.corpus_units()?
    } else {
        units.to_vec()
    };
    debug!(count = units.len(), "printing corpus units");

    let program = workspace.program(bin_print)?;
    let invocation = Invocation::new(program.to_string_lossy())
        .stdin(units.join("\n"))
        .current_dir(workspace.root());
    runner.run(&invocation)?;
    Ok(())
}

/// Outcome of [`print_crashes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrashSummary {
    pub attempted: usize,
    pub failed: usize,
}

/// Decodes crash units with the print binary, one process per unit.
///
/// Unlike [`print_corpus`], the unit name itself is what the print binary
/// receives, and a unit the print binary fails on is reported and skipped.
/// Only a print binary that cannot be started at all stops the loop.
pub fn print_crashes(
    workspace: &Workspace,
    bin_print: &str,
    units: &[String],
    runner: &mut dyn CommandRunner,
) -> Result<CrashSummary, WorkflowError> {
    let units = if units.is_empty() {
        workspace.root_files_matching(CRASH_PATTERN)?
    } else {
        units.to_vec()
    };

    let program = workspace.program(bin_print)?.to_string_lossy().into_owned();
    let mut summary = CrashSummary::default();
    for unit in &units {
        let invocation = Invocation::new(&program)
            .stdin(unit.as_bytes())
            .current_dir(workspace.root());
        let result = runner.run(&invocation);
        println!();
        summary.attempted += 1;

        match result {
            Ok(()) => {}
            Err(err @ RunError::Spawn { .. }) => return Err(err.into()),
            Err(err) => {
                println!("{err}");
                warn!(unit = %unit, error = %err, "failed to print crash");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Removes the corpus and every crash, oom and slow-unit artifact.
///
/// Missing artifacts are not an error, so cleaning twice is harmless.
/// Returns the number of artifacts removed.
pub fn clean(workspace: &Workspace) -> Result<usize, WorkflowError> {
    let mut removed = 0;

    let corpus = workspace.corpus_dir();
    match std::fs::remove_dir_all(&corpus) {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(WorkflowError::io(
                format!("failed to remove {}", corpus.display()),
                e,
            ));
        }
    }

    for pattern in [CRASH_PATTERN, OOM_PATTERN, SLOW_UNIT_PATTERN] {
        for path in workspace.root_paths_matching(pattern)? {
            if remove_file_if_exists(&path)? {
                removed += 1;
            }
        }
    }

    info!(removed, "workspace cleaned");
    Ok(removed)
}

/// Copies `mutator` to where the fuzzing engine looks for it, replacing any previous one.
fn stage_mutator(workspace: &Workspace, mutator: &Path) -> Result<(), WorkflowError> {
    let source = workspace.resolve(mutator);
    let destination = workspace.mutator_path();
    debug!(from = %source.display(), to = %destination.display(), "staging mutator");
    std::fs::copy(&source, &destination).map_err(|e| {
        WorkflowError::io(
            format!("failed to copy mutator {}", source.display()),
            e,
        )
    })?;
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<bool, WorkflowError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(WorkflowError::io(
            format!("failed to remove {}", path.display()),
            e,
        )),
    }
}
