//! Compiler command lines for the fuzz and print binaries.
//!
//! Both binaries are built from the same sources and module init function; they
//! differ only in their entry shim and instrumentation.

use crate::config::BuildConfig;
use crate::runner::Invocation;
use std::path::{Path, PathBuf};

/// Prefix of the module init function a source file named `<name>.c` exports.
pub const MODINIT_PREFIX: &str = "PyInit_";

/// Appended to the fuzz binary path to name the print binary.
pub const PRINT_SUFFIX: &str = "_print";

pub const COMMON_SHIM: &str = "pyfuzzer_common.c";
pub const FUZZ_SHIM: &str = "pyfuzzer.c";
pub const PRINT_SHIM: &str = "pyfuzzer_print.c";

/// Instrumentation of the fuzz binary unless `CFLAGS` replaces it.
pub const DEFAULT_SANITIZER_FLAGS: &[&str] = &[
    "-fprofile-instr-generate",
    "-fcoverage-mapping",
    "-g",
    "-fsanitize=undefined",
    "-fsanitize=signed-integer-overflow",
    "-fsanitize=alignment",
    "-fsanitize=bool",
    "-fsanitize=builtin",
    "-fsanitize=bounds",
    "-fsanitize=enum",
    "-fno-sanitize-recover=all",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Instrumented binary driven by the fuzzing engine.
    Fuzz,
    /// Plain binary decoding single units into readable calls.
    Print,
}

impl BuildMode {
    fn entry_shim(self) -> &'static str {
        match self {
            BuildMode::Fuzz => FUZZ_SHIM,
            BuildMode::Print => PRINT_SHIM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSpec {
    pub sources: Vec<String>,
    pub entry_point: String,
    /// Path of the fuzz binary; the print binary derives its name from it.
    pub output: String,
    pub mode: BuildMode,
}

impl CompileSpec {
    /// Spec for `mode`, deriving the entry point from the first source when
    /// `entry_point` is `None`.
    pub fn new(
        sources: Vec<String>,
        entry_point: Option<String>,
        output: impl Into<String>,
        mode: BuildMode,
    ) -> Self {
        let entry_point = entry_point.unwrap_or_else(|| {
            sources
                .first()
                .map(|first| default_modinit_func(first))
                .unwrap_or_default()
        });
        Self {
            sources,
            entry_point,
            output: output.into(),
            mode,
        }
    }

    /// The same sources and entry point built in `mode`.
    pub fn with_mode(&self, mode: BuildMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Where the compiler writes the binary for this spec's mode.
    pub fn output_path(&self) -> String {
        match self.mode {
            BuildMode::Fuzz => self.output.clone(),
            BuildMode::Print => print_output_path(&self.output),
        }
    }
}

/// `PyInit_<stem>` for `source`, with directory and extension stripped.
pub fn default_modinit_func(source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{MODINIT_PREFIX}{stem}")
}

pub fn print_output_path(output: &str) -> String {
    format!("{output}{PRINT_SUFFIX}")
}

/// Builds the complete compiler invocation for `spec`.
pub fn compile_command(spec: &CompileSpec, config: &BuildConfig) -> Invocation {
    let mut invocation = Invocation::new(&config.compiler);

    if spec.mode == BuildMode::Fuzz {
        invocation = invocation.arg(&config.fuzzing_engine_flag);
    }
    invocation = invocation.arg(format!("-DMODINIT_FUNC={}", spec.entry_point));

    match (config.user_flag_list(), spec.mode) {
        (Some(user_flags), _) => invocation = invocation.args(user_flags),
        (None, BuildMode::Fuzz) => {
            invocation = invocation.args(DEFAULT_SANITIZER_FLAGS.iter().copied())
        }
        (None, BuildMode::Print) => {}
    }

    invocation
        .args(config.include_paths.iter().cloned())
        .args(spec.sources.iter().cloned())
        .args(
            shim_sources(spec, config)
                .iter()
                .map(|shim| shim.to_string_lossy().into_owned()),
        )
        .args(config.link_flags.iter().cloned())
        .arg("-o")
        .arg(spec.output_path())
}

/// The shared shim and the entry shim of `spec`'s mode, in link order.
pub fn shim_sources(spec: &CompileSpec, config: &BuildConfig) -> [PathBuf; 2] {
    [
        config.shim_dir.join(COMMON_SHIM),
        config.shim_dir.join(spec.mode.entry_shim()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(user_flags: Option<&str>) -> BuildConfig {
        BuildConfig {
            compiler: "clang".to_string(),
            user_flags: user_flags.map(str::to_string),
            include_paths: vec!["-I/usr/include/python3.12".to_string()],
            link_flags: vec!["-lpython3.12".to_string(), "-L/usr/lib".to_string()],
            fuzzing_engine_flag: "-fsanitize=fuzzer".to_string(),
            shim_dir: PathBuf::from("/opt/shims"),
        }
    }

    fn spec(mode: BuildMode) -> CompileSpec {
        CompileSpec::new(
            vec!["src/foo.c".to_string(), "src/bar.c".to_string()],
            None,
            "./pyfuzzer",
            mode,
        )
    }

    #[test]
    fn modinit_func_strips_directory_and_extension() {
        assert_eq!(default_modinit_func("foo.ext"), "PyInit_foo");
        assert_eq!(default_modinit_func("a/b/hello.c"), "PyInit_hello");
        assert_eq!(default_modinit_func("noext"), "PyInit_noext");
        assert_eq!(spec(BuildMode::Fuzz).entry_point, "PyInit_foo");
    }

    #[test]
    fn explicit_entry_point_wins() {
        let spec = CompileSpec::new(
            vec!["foo.c".to_string()],
            Some("PyInit_custom".to_string()),
            "./pyfuzzer",
            BuildMode::Fuzz,
        );
        assert_eq!(spec.entry_point, "PyInit_custom");
    }

    #[test]
    fn fuzz_command_layout() {
        let invocation = compile_command(&spec(BuildMode::Fuzz), &config(None));
        let mut expected = vec![
            "clang",
            "-fsanitize=fuzzer",
            "-DMODINIT_FUNC=PyInit_foo",
        ];
        expected.extend(DEFAULT_SANITIZER_FLAGS);
        expected.extend([
            "-I/usr/include/python3.12",
            "src/foo.c",
            "src/bar.c",
            "/opt/shims/pyfuzzer_common.c",
            "/opt/shims/pyfuzzer.c",
            "-lpython3.12",
            "-L/usr/lib",
            "-o",
            "./pyfuzzer",
        ]);
        assert_eq!(invocation.argv(), expected);
    }

    #[test]
    fn user_flags_replace_sanitizers_in_fuzz_mode() {
        let config = config(Some("-O1 -fno-omit-frame-pointer"));
        let invocation = compile_command(&spec(BuildMode::Fuzz), &config);
        let argv = invocation.argv();
        assert!(argv.contains(&"-O1"));
        for flag in DEFAULT_SANITIZER_FLAGS {
            assert!(!argv.contains(flag), "unexpected {flag}");
        }
        // Link flags are still appended.
        assert!(argv.contains(&"-lpython3.12"));
    }

    #[test]
    fn print_command_layout() {
        let invocation = compile_command(&spec(BuildMode::Print), &config(None));
        assert_eq!(
            invocation.argv(),
            vec![
                "clang",
                "-DMODINIT_FUNC=PyInit_foo",
                "-I/usr/include/python3.12",
                "src/foo.c",
                "src/bar.c",
                "/opt/shims/pyfuzzer_common.c",
                "/opt/shims/pyfuzzer_print.c",
                "-lpython3.12",
                "-L/usr/lib",
                "-o",
                "./pyfuzzer_print",
            ]
        );
    }

    #[test]
    fn print_command_applies_user_flags_only() {
        let invocation = compile_command(&spec(BuildMode::Print), &config(Some("-O0")));
        let argv = invocation.argv();
        assert_eq!(&argv[..3], &["clang", "-DMODINIT_FUNC=PyInit_foo", "-O0"]);
        assert!(!argv.contains(&"-fsanitize=fuzzer"));
    }

    #[test]
    fn print_output_is_fuzz_output_with_suffix() {
        for output in ["./pyfuzzer", "out/fuzz", "x"] {
            let fuzz = CompileSpec::new(vec!["m.c".to_string()], None, output, BuildMode::Fuzz);
            let print = fuzz.with_mode(BuildMode::Print);
            assert_eq!(print.output_path(), format!("{}_print", fuzz.output_path()));
            assert_eq!(print.entry_point, fuzz.entry_point);
            assert_eq!(print.sources, fuzz.sources);
        }
    }
}
