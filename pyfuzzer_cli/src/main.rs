use pyfuzzer_core::config::{BuildConfig, EnvOverrides, FileConfig, Settings};
use pyfuzzer_core::host::PythonProbe;
use pyfuzzer_core::runner::{CommandRunner, ProcessRunner};
use pyfuzzer_core::workflow::{self, BuildOptions, RunOptions};
use pyfuzzer_core::{WorkflowError, Workspace};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Use libFuzzer to fuzz test Python 3.6+ C extension modules.
#[derive(Parser, Debug)]
#[command(name = "pyfuzzer", author, version, about, long_about = None)]
struct Cli {
    /// Print the full error report instead of a one-line message.
    #[arg(short, long)]
    debug: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Workspace directory holding the corpus, crashes and profiles.
    #[arg(short = 'C', long, default_value = ".")]
    directory: PathBuf,

    /// Config file, instead of pyfuzzer.toml in the workspace directory.
    #[arg(long)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the fuzz tester.
    ///
    /// The C shims linked into both binaries are read from PYFUZZER_SHIM_DIR,
    /// or shim-dir in pyfuzzer.toml.
    Build {
        /// C extension module PyMODINIT_FUNC function, or first C source
        /// PyInit_{filename} without extension if not given.
        #[arg(short = 'M', long = "modinit_func")]
        modinit_func: Option<String>,

        /// Output executable.
        #[arg(short, long, default_value = "./pyfuzzer")]
        output: String,

        /// Build without print.
        #[arg(short = 'F', long)]
        fuzzer_only: bool,

        /// C extension source files.
        #[arg(required = true)]
        csources: Vec<String>,
    },

    /// Run the fuzz tester.
    Run {
        /// Mutator module.
        #[arg(short, long)]
        mutator: Option<PathBuf>,

        /// Add a libFuzzer command line argument.
        #[arg(short = 'l', long = "libfuzzer-argument", allow_hyphen_values = true)]
        libfuzzer_argument: Vec<String>,

        /// Fuzzer binary.
        #[arg(default_value = "./pyfuzzer")]
        bin: String,
    },

    /// Print code coverage.
    #[command(name = "print_coverage")]
    PrintCoverage {
        /// Fuzzer binary.
        #[arg(default_value = "./pyfuzzer")]
        bin: String,
    },

    /// Print corpus units as Python functions with arguments and return value or exception.
    #[command(name = "print_corpus")]
    PrintCorpus {
        /// Fuzzer print binary.
        #[arg(default_value = "./pyfuzzer_print")]
        bin_print: String,

        /// Units to print, or whole corpus if none given.
        units: Vec<String>,
    },

    /// Print all crashes.
    #[command(name = "print_crashes")]
    PrintCrashes {
        /// Fuzzer print binary.
        #[arg(default_value = "./pyfuzzer_print")]
        bin_print: String,

        /// Crashes to print, or all if none given.
        units: Vec<String>,
    },

    /// Remove the corpus and all crashes to start over.
    Clean,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let debug = cli.debug;
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", report(&err, debug));
            ExitCode::from(exit_status_for(&err))
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let workspace = Workspace::new(cli.directory);
    let file_config = FileConfig::discover(workspace.root(), cli.config_file.as_deref())?;
    let settings = Settings::merge(EnvOverrides::from_env(), file_config);
    let mut runner = ProcessRunner::new();

    match cli.command {
        Commands::Build {
            modinit_func,
            output,
            fuzzer_only,
            csources,
        } => {
            let probe = PythonProbe::new(&settings.python);
            let config = BuildConfig::resolve(&settings, &probe)?;
            let options = BuildOptions {
                sources: csources,
                modinit_func,
                output,
                fuzzer_only,
            };
            let outputs = workflow::build(&workspace, &config, &options, &mut runner)?;
            info!(?outputs, "build finished");
        }
        Commands::Run {
            mutator,
            libfuzzer_argument,
            bin,
        } => {
            let options = RunOptions {
                bin,
                mutator,
                libfuzzer_arguments: libfuzzer_argument,
            };
            workflow::run(&workspace, &options, &mut runner)?;
        }
        Commands::PrintCoverage { bin } => {
            print_coverage(&workspace, &settings, &bin, &mut runner)?;
        }
        Commands::PrintCorpus { bin_print, units } => {
            workflow::print_corpus(&workspace, &bin_print, &units, &mut runner)?;
        }
        Commands::PrintCrashes { bin_print, units } => {
            let summary = workflow::print_crashes(&workspace, &bin_print, &units, &mut runner)?;
            info!(
                attempted = summary.attempted,
                failed = summary.failed,
                "printed crashes"
            );
        }
        Commands::Clean => {
            workflow::clean(&workspace)?;
        }
    }

    Ok(())
}

fn print_coverage(
    workspace: &Workspace,
    settings: &Settings,
    bin: &str,
    runner: &mut dyn CommandRunner,
) -> anyhow::Result<()> {
    workflow::print_coverage(workspace, settings, bin, runner)
        .with_context(|| format!("coverage report for {bin} failed"))
}

/// One line with the whole cause chain, or the full report with `-d`.
fn report(err: &anyhow::Error, debug: bool) -> String {
    if debug {
        format!("Error: {err:?}")
    } else {
        format!("error: {err:#}")
    }
}

/// The failing child's exit code when there is one, otherwise 1.
fn exit_status_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<WorkflowError>()
        .and_then(WorkflowError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}
