//! Problem Context and Compilation Target (§2, §4.2, §9).
//!
//! The specification's source material models these as an abstract base class plus a mixin
//! hierarchy (per-problem-type attribute bags) and decorator-based registration of concrete
//! problem types. Per §9's design notes this is flattened into one interface with an explicit
//! constructor switch — `"batch"` is the only variant the core ships, so the switch has exactly
//! one arm today, but the trait leaves room for more without touching the scheduler or tasks.

pub mod batch;

use std::path::PathBuf;

use judge_dag::{CheckerType, Compiler, SummaryType};

use crate::challenge::{Challenge, TestData};
use crate::task_entry::TaskEntry;

/// Per-challenge object selected by `problem_type`. Owns the problem-specific configuration
/// (compiler choices, checker/summary configuration) and knows how to build the task DAG for one
/// challenge.
pub trait ProblemContext: Send + Sync {
    fn userprog_compiler(&self) -> Compiler;
    fn userprog_compile_args(&self) -> Vec<String>;
    fn has_grader(&self) -> bool;
    fn checker_type(&self) -> CheckerType;
    fn checker_compiler(&self) -> Option<Compiler>;
    fn checker_compile_args(&self) -> Vec<String>;
    fn summary_type(&self) -> SummaryType;

    fn build_task_dag(&self, chal: &Challenge) -> Vec<TaskEntry>;
    fn create_testdata(&self, chal: &Challenge, id: u32, input: &str, output: &str) -> TestData;

    /// Host path of the compiled user-program artifact, once the compile task has run. `None`
    /// before compilation or if it failed.
    fn userprog_path(&self) -> Option<PathBuf>;
    /// Host path of the compiled checker artifact, for checker types that need one.
    fn checker_path(&self) -> Option<PathBuf>;
    /// Called by the user-program `CompilationTarget` once the artifact is in the challenge's
    /// file store.
    fn set_userprog_path(&self, path: PathBuf);
    /// Called by the checker `CompilationTarget` once the artifact is in the challenge's file
    /// store.
    fn set_checker_path(&self, path: PathBuf);
}

/// Construct a `ProblemContext` for `problem_type`. An explicit switch, not a registry (§9
/// "Dynamic registration").
pub fn build_problem_context(
    problem_type: &str,
    obj: &batch::BatchConfig,
) -> anyhow::Result<std::sync::Arc<dyn ProblemContext>> {
    match problem_type {
        "batch" => Ok(std::sync::Arc::new(batch::BatchProblemContext::new(obj.clone()))),
        other => Err(anyhow::format_err!("unknown problem type: {other}")),
    }
}

/// A polymorphic adapter telling the Compile task *what* to compile and where to stash the
/// result (§2 "Compilation Target", §4.2).
pub trait CompilationTarget: Send + Sync {
    /// Filesystem preconditions (grader folder present, checker source present, ...). On failure
    /// this sets `TotalResult.status` itself and returns `false`.
    fn can_compile(&self, chal: &Challenge) -> bool;
    /// `(host path, workdir-relative name)` pairs to copy into the sandbox before compiling.
    fn get_source_files(&self, chal: &Challenge) -> Vec<(PathBuf, String)>;
    /// The subset of `get_source_files`' names that are actual compiler inputs (as opposed to
    /// resource files copied in for e.g. a grader's data files).
    fn get_source_list(&self, chal: &Challenge) -> Vec<String>;
    fn get_compiler(&self, chal: &Challenge) -> Compiler;
    fn get_compile_args(&self, chal: &Challenge) -> Vec<String>;
    fn get_output_name(&self, chal: &Challenge) -> String;
    /// Called with the workdir-relative artifact name on a Normal sandbox outcome.
    fn on_compile_success(&self, chal: &Challenge, artifact_name: &str);
    /// Called on any non-Normal sandbox outcome for the compile step; `stderr` is the compiler's
    /// captured standard error, if the sandbox produced one.
    fn on_compile_failure(
        &self,
        chal: &Challenge,
        status: judge_dag::SandboxStatus,
        stderr: Option<String>,
    );
}
