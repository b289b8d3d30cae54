//! The Language Registry (§2 "Language Registry", §9 "Per-language descriptors as data"): a
//! static table mapping a `Compiler` to the file extensions, thread-count policy, and
//! compile/execute command builders for that toolchain.
//!
//! Each entry is plain data plus a pair of function pointers — not a trait object per language —
//! per the specification's explicit instruction to keep these as a built-in table rather than
//! polymorphic code.

use judge_dag::Compiler;

/// A filename, relative to the engine's bundled `tools/` directory, that must be copied into the
/// sandbox workdir alongside the sources before compiling (only python3 and java need one).
pub type CompileHelper = Option<&'static str>;

/// Builds the compile-time argv given the (already copied-in) source filenames, extra
/// user-supplied flags, and the desired output executable name.
pub type CompileArgvFn = fn(sources: &[String], extra_args: &[String], executable_name: &str) -> Vec<String>;

/// Builds the `(program, args)` pair used to execute a compiled artifact. `main_class` is `Some`
/// only for Java, and distinguishes a grader entry point from a bare `main`.
pub type ExecuteArgvFn =
    fn(executable_name: &str, main_class: Option<&str>, user_args: &[String]) -> (String, Vec<String>);

/// Everything the engine needs to know about one compiler/language.
pub struct LanguageDescriptor {
    pub compiler: Compiler,
    pub name: &'static str,
    pub header_ext: &'static str,
    pub source_ext: &'static str,
    pub object_ext: &'static str,
    pub executable_ext: &'static str,
    /// Maximum number of threads/processes the compiled program is allowed to spawn.
    pub allow_thread_count: u32,
    pub compile_helper: CompileHelper,
    pub build_compile_argv: CompileArgvFn,
    pub build_execute_argv: ExecuteArgvFn,
}

fn strip_ext<'a>(source: &'a str, ext: &str) -> &'a str {
    source.strip_suffix(ext).unwrap_or(source)
}

fn gcc_c11_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    direct_compile_argv("/usr/bin/gcc", &["-std=gnu11"], sources, extra_args, exe, &["-lm"])
}

fn clang_c11_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    direct_compile_argv("/usr/bin/clang", &["-std=c11"], sources, extra_args, exe, &["-lm"])
}

fn gcc_cpp17_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    direct_compile_argv("/usr/bin/g++", &["-std=gnu++17"], sources, extra_args, exe, &[])
}

fn clang_cpp17_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    direct_compile_argv("/usr/bin/clang++", &["-std=c++17"], sources, extra_args, exe, &[])
}

fn rust_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    let mut argv = vec!["/usr/bin/rustc".to_string(), "-O".to_string(), "-o".to_string(), exe.to_string()];
    if let Some(first) = sources.first() {
        argv.push(first.clone());
    }
    argv.extend(extra_args.iter().cloned());
    argv
}

fn asm_libc_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    direct_compile_argv("/usr/bin/gcc", &[], sources, extra_args, exe, &["-lm"])
}

fn asm_libstdcpp_argv(sources: &[String], extra_args: &[String], exe: &str) -> Vec<String> {
    direct_compile_argv("/usr/bin/g++", &[], sources, extra_args, exe, &["-lm"])
}

fn python3_argv(sources: &[String], _extra_args: &[String], exe: &str) -> Vec<String> {
    let stem = sources.first().map(|s| strip_ext(s, ".py")).unwrap_or("");
    vec![
        "/usr/bin/bash".to_string(),
        "compile_python3.sh".to_string(),
        stem.to_string(),
        exe.to_string(),
    ]
}

fn java_argv(_sources: &[String], _extra_args: &[String], exe: &str) -> Vec<String> {
    vec!["/usr/bin/bash".to_string(), "compile_java.sh".to_string(), exe.to_string()]
}

/// Shared shape for the compiled languages that invoke their compiler directly:
/// `compiler flags... -o exe sources... extra_args... trailing...`
fn direct_compile_argv(
    compiler: &str,
    flags: &[&str],
    sources: &[String],
    extra_args: &[String],
    exe: &str,
    trailing: &[&str],
) -> Vec<String> {
    let mut argv = vec![compiler.to_string()];
    argv.extend(flags.iter().map(|s| s.to_string()));
    argv.push("-O2".to_string());
    argv.push("-pipe".to_string());
    argv.push("-static".to_string());
    argv.push("-s".to_string());
    argv.push("-o".to_string());
    argv.push(exe.to_string());
    argv.extend(sources.iter().cloned());
    argv.extend(extra_args.iter().cloned());
    argv.extend(trailing.iter().map(|s| s.to_string()));
    argv
}

fn compiled_execute_argv(exe: &str, _main: Option<&str>, user_args: &[String]) -> (String, Vec<String>) {
    (format!("./{exe}"), user_args.to_vec())
}

fn python3_execute_argv(exe: &str, _main: Option<&str>, user_args: &[String]) -> (String, Vec<String>) {
    let mut args = vec![exe.to_string()];
    args.extend(user_args.iter().cloned());
    ("/usr/bin/python3".to_string(), args)
}

fn java_execute_argv(exe: &str, main: Option<&str>, user_args: &[String]) -> (String, Vec<String>) {
    let main_class = main.unwrap_or("main");
    let mut args = vec!["-cp".to_string(), exe.to_string(), main_class.to_string()];
    args.extend(user_args.iter().cloned());
    ("/usr/bin/java".to_string(), args)
}

const LANGUAGES: &[LanguageDescriptor] = &[
    LanguageDescriptor {
        compiler: Compiler::GccC11,
        name: "c",
        header_ext: ".h",
        source_ext: ".c",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: gcc_c11_argv,
        build_execute_argv: compiled_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::ClangC11,
        name: "c",
        header_ext: ".h",
        source_ext: ".c",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: clang_c11_argv,
        build_execute_argv: compiled_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::GccCpp17,
        name: "cpp",
        header_ext: ".h",
        source_ext: ".cpp",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: gcc_cpp17_argv,
        build_execute_argv: compiled_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::ClangCpp17,
        name: "cpp",
        header_ext: ".h",
        source_ext: ".cpp",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: clang_cpp17_argv,
        build_execute_argv: compiled_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::Rust,
        name: "rust",
        header_ext: "",
        source_ext: ".rs",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: rust_argv,
        build_execute_argv: compiled_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::Python3,
        name: "python",
        header_ext: "",
        source_ext: ".py",
        object_ext: ".pyc",
        executable_ext: ".pyz",
        allow_thread_count: 1,
        compile_helper: Some("compile_python3.sh"),
        build_compile_argv: python3_argv,
        build_execute_argv: python3_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::Java,
        name: "java",
        header_ext: "",
        source_ext: ".java",
        object_ext: ".javac",
        executable_ext: ".jar",
        allow_thread_count: 16,
        compile_helper: Some("compile_java.sh"),
        build_compile_argv: java_argv,
        build_execute_argv: java_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::AsmWithLibc,
        name: "asm",
        header_ext: "",
        source_ext: ".s",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: asm_libc_argv,
        build_execute_argv: compiled_execute_argv,
    },
    LanguageDescriptor {
        compiler: Compiler::AsmWithLibstdcpp,
        name: "asm",
        header_ext: "",
        source_ext: ".s",
        object_ext: ".o",
        executable_ext: "",
        allow_thread_count: 1,
        compile_helper: None,
        build_compile_argv: asm_libstdcpp_argv,
        build_execute_argv: compiled_execute_argv,
    },
];

/// Look up the descriptor for a compiler. Every `Compiler` variant has an entry; this never
/// returns `None` for a value that actually deserialized as a `Compiler`.
pub fn descriptor(compiler: Compiler) -> &'static LanguageDescriptor {
    LANGUAGES
        .iter()
        .find(|d| d.compiler == compiler)
        .unwrap_or_else(|| unreachable!("no language descriptor registered for {:?}", compiler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_compiler_has_a_descriptor() {
        for compiler in [
            Compiler::GccC11,
            Compiler::ClangC11,
            Compiler::GccCpp17,
            Compiler::ClangCpp17,
            Compiler::Rust,
            Compiler::Python3,
            Compiler::Java,
            Compiler::AsmWithLibc,
            Compiler::AsmWithLibstdcpp,
        ] {
            assert_eq!(descriptor(compiler).compiler, compiler);
        }
    }

    #[test]
    fn gcc_c11_argv_matches_expected_flags() {
        let argv = gcc_c11_argv(&["a.c".to_string()], &["-DFOO".to_string()], "a");
        assert_eq!(
            argv,
            vec![
                "/usr/bin/gcc", "-std=gnu11", "-O2", "-pipe", "-static", "-s", "-o", "a", "a.c",
                "-DFOO", "-lm",
            ]
        );
    }

    #[test]
    fn java_execute_argv_defaults_to_main() {
        let (prog, args) = java_execute_argv("Sol.jar", None, &[]);
        assert_eq!(prog, "/usr/bin/java");
        assert_eq!(args, vec!["-cp", "Sol.jar", "main"]);
    }

    #[test]
    fn java_execute_argv_uses_grader_class_when_given() {
        let (_, args) = java_execute_argv("Sol.jar", Some("grader"), &[]);
        assert_eq!(args, vec!["-cp", "Sol.jar", "grader"]);
    }

    #[test]
    fn python3_compile_argv_strips_source_extension() {
        let argv = python3_argv(&["sol.py".to_string()], &[], "sol.pyz");
        assert_eq!(
            argv,
            vec!["/usr/bin/bash", "compile_python3.sh", "sol", "sol.pyz"]
        );
    }
}
