//! Compile: turns a `CompilationTarget`'s sources into an executable artifact (§4.2).
//!
//! One `CompileTask` instance serves either the user program or the checker, depending on which
//! `CompilationTarget` it's constructed with; the task itself only knows the generic
//! copy-in/compile/copy-out choreography.

use std::fs;
use std::path::PathBuf;

use judge_dag::SandboxStatus;
use judge_store::{run_sandbox, SandboxParams};

use crate::challenge::Challenge;
use crate::problem::CompilationTarget;
use crate::task_entry::{Task, TaskEntry};

const COMPILE_TIME_LIMIT_MS: u64 = 20_000;
const COMPILE_MEMORY_LIMIT_KIB: u64 = 1_048_576;
const COMPILE_STACK_LIMIT_KIB: u64 = 65_536;
const COMPILE_OUTPUT_LIMIT_KIB: u64 = 65_536;
const COMPILE_PROC_LIMIT: u32 = 32;

const PYTHON3_COMPILE_HELPER: &str = include_str!("../../tools/compile_python3.sh");
const JAVA_COMPILE_HELPER: &str = include_str!("../../tools/compile_java.sh");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTaskKind {
    User,
    Checker,
}

pub struct CompileTask {
    #[allow(dead_code)]
    kind: CompileTaskKind,
    target: Box<dyn CompilationTarget>,
}

impl CompileTask {
    pub fn new(kind: CompileTaskKind, target: Box<dyn CompilationTarget>) -> Self {
        CompileTask { kind, target }
    }
}

fn compile_helper_source(name: &str) -> Option<&'static str> {
    match name {
        "compile_python3.sh" => Some(PYTHON3_COMPILE_HELPER),
        "compile_java.sh" => Some(JAVA_COMPILE_HELPER),
        _ => None,
    }
}

impl Task for CompileTask {
    fn setup(&self, chal: &Challenge, _entry: &TaskEntry) -> bool {
        chal.total_status().is_none()
    }

    fn run(&self, chal: &Challenge, _entry: &TaskEntry) {
        if !self.target.can_compile(chal) {
            return;
        }

        let workdir = match chal.sandbox_box.alloc_workdir() {
            Ok(workdir) => workdir,
            Err(e) => {
                self.target
                    .on_compile_failure(chal, SandboxStatus::RunnerError, Some(e.to_string()));
                return;
            }
        };

        for (host_path, name) in self.target.get_source_files(chal) {
            if let Err(e) = fs::copy(&host_path, workdir.join(&name)) {
                self.target.on_compile_failure(
                    chal,
                    SandboxStatus::RunnerError,
                    Some(format!("failed to stage {host_path:?}: {e}")),
                );
                chal.sandbox_box.remove_workdir(&workdir);
                return;
            }
        }

        let compiler = self.target.get_compiler(chal);
        let descriptor = judge_lang::descriptor(compiler);
        if let Some(helper) = descriptor.compile_helper {
            match compile_helper_source(helper) {
                Some(source) => {
                    if let Err(e) = fs::write(workdir.join(helper), source) {
                        self.target.on_compile_failure(
                            chal,
                            SandboxStatus::RunnerError,
                            Some(format!("failed to stage compile helper {helper}: {e}")),
                        );
                        chal.sandbox_box.remove_workdir(&workdir);
                        return;
                    }
                }
                None => {
                    self.target.on_compile_failure(
                        chal,
                        SandboxStatus::RunnerError,
                        Some(format!("no bundled compile helper for {helper}")),
                    );
                    chal.sandbox_box.remove_workdir(&workdir);
                    return;
                }
            }
        }

        let sources = self.target.get_source_list(chal);
        let extra_args = self.target.get_compile_args(chal);
        let output_name = self.target.get_output_name(chal);
        let argv = (descriptor.build_compile_argv)(&sources, &extra_args, &output_name);

        let stderr_path = workdir.join("compile-stderr");
        let params = SandboxParams {
            exe_path: PathBuf::from(&argv[0]),
            args: argv[1..].to_vec(),
            time_limit_ms: COMPILE_TIME_LIMIT_MS,
            memory_limit_kib: COMPILE_MEMORY_LIMIT_KIB,
            stack_limit_kib: COMPILE_STACK_LIMIT_KIB,
            output_limit_kib: COMPILE_OUTPUT_LIMIT_KIB,
            proc_limit: COMPILE_PROC_LIMIT,
            stderr: Some(stderr_path.clone()),
            allow_proc: true,
            ..Default::default()
        };

        let outcome = run_sandbox(&params, &workdir);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.target
                    .on_compile_failure(chal, SandboxStatus::RunnerError, Some(e.to_string()));
                chal.sandbox_box.remove_workdir(&workdir);
                return;
            }
        };

        if outcome.status == SandboxStatus::Normal {
            match chal.sandbox_box.adopt_from_workdir(&workdir, &output_name) {
                Ok(()) => self.target.on_compile_success(chal, &output_name),
                Err(e) => {
                    self.target
                        .on_compile_failure(chal, SandboxStatus::RunnerError, Some(e.to_string()));
                }
            }
        } else {
            let stderr = fs::read_to_string(&stderr_path).ok();
            self.target.on_compile_failure(chal, outcome.status, stderr);
        }

        chal.sandbox_box.remove_workdir(&workdir);
    }

    fn finish(&self, _chal: &Challenge, _entry: &TaskEntry) {}
}
