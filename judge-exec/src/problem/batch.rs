//! The `"batch"` Problem Context: one user program, one optional grader, one checker, and a
//! GROUPMIN/OVERWRITE subtask scoring policy. Grounded on the batch evaluation pipeline's
//! mixin-flattened configuration (user-program + checker + summary fields in one record) and its
//! `build_task_dag`.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use judge_dag::{CheckerType, Compiler, MessageType, SandboxStatus, Status, SummaryType};

use crate::challenge::{Challenge, TestData};
use crate::order::compute_order;
use crate::problem::{CompilationTarget, ProblemContext};
use crate::task_entry::{link_task, TaskEntry};
use crate::tasks::compile::{CompileTask, CompileTaskKind};
use crate::tasks::execute::ExecuteTask;
use crate::tasks::scoring::ScoringTask;
use crate::tasks::summary::SummaryTask;

/// The subset of a submission message that configures a batch problem (§6 "submission message").
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub userprog_compiler: Compiler,
    pub userprog_compile_args: Vec<String>,
    pub has_grader: bool,
    pub checker_type: CheckerType,
    pub checker_compiler: Option<Compiler>,
    pub checker_compile_args: Vec<String>,
    pub summary_type: SummaryType,
    /// Accepted and stored for `SummaryType::Custom` (§6's submission-message table), but not yet
    /// read anywhere: `Custom` itself scores every subtask zero until a custom-summary runner is
    /// built.
    pub summary_compiler: Option<Compiler>,
    pub summary_compile_args: Vec<String>,
}

pub struct BatchProblemContext {
    config: BatchConfig,
    userprog_path: Mutex<Option<PathBuf>>,
    checker_path: Mutex<Option<PathBuf>>,
}

impl BatchProblemContext {
    pub fn new(config: BatchConfig) -> Self {
        BatchProblemContext {
            config,
            userprog_path: Mutex::new(None),
            checker_path: Mutex::new(None),
        }
    }
}

impl ProblemContext for BatchProblemContext {
    fn userprog_compiler(&self) -> Compiler {
        self.config.userprog_compiler
    }

    fn userprog_compile_args(&self) -> Vec<String> {
        self.config.userprog_compile_args.clone()
    }

    fn has_grader(&self) -> bool {
        self.config.has_grader
    }

    fn checker_type(&self) -> CheckerType {
        self.config.checker_type
    }

    fn checker_compiler(&self) -> Option<Compiler> {
        self.config.checker_compiler
    }

    fn checker_compile_args(&self) -> Vec<String> {
        self.config.checker_compile_args.clone()
    }

    fn summary_type(&self) -> SummaryType {
        self.config.summary_type
    }

    fn userprog_path(&self) -> Option<PathBuf> {
        self.userprog_path.lock().unwrap().clone()
    }

    fn checker_path(&self) -> Option<PathBuf> {
        self.checker_path.lock().unwrap().clone()
    }

    fn set_userprog_path(&self, path: PathBuf) {
        *self.userprog_path.lock().unwrap() = Some(path);
    }

    fn set_checker_path(&self, path: PathBuf) {
        *self.checker_path.lock().unwrap() = Some(path);
    }

    fn create_testdata(&self, chal: &Challenge, id: u32, input: &str, output: &str) -> TestData {
        TestData::new(
            id,
            chal.res_path.join("testdata").join(input),
            chal.res_path.join("testdata").join(output),
        )
    }

    fn build_task_dag(&self, chal: &Challenge) -> Vec<TaskEntry> {
        let mut tasks = Vec::new();

        let mut compile_task = TaskEntry::new(
            Box::new(CompileTask::new(
                CompileTaskKind::User,
                Box::new(UserProgramCompilationTarget),
            )),
            chal.internal_id,
            chal.priority,
        );
        let mut summary_task =
            TaskEntry::new(Box::new(SummaryTask), chal.internal_id, chal.priority);

        let order = compute_order(&chal.testdatas, chal.skip_nonac);
        let mut exec_tasks = Vec::new();
        let mut scoring_tasks = Vec::new();

        let mut testdata_ids: Vec<u32> = chal.testdatas.keys().copied().collect();
        testdata_ids.sort_unstable();

        for id in testdata_ids {
            let rank = order[&id];
            let mut exec_task = TaskEntry::new(
                Box::new(ExecuteTask::new(id)),
                chal.internal_id,
                chal.priority,
            )
            .with_order(rank);
            let mut scoring_task = TaskEntry::new(
                Box::new(ScoringTask::new(id)),
                chal.internal_id,
                chal.priority,
            )
            .with_order(rank);

            link_task(&mut exec_task, &mut scoring_task);
            link_task(&mut scoring_task, &mut summary_task);
            link_task(&mut compile_task, &mut exec_task);

            exec_tasks.push(exec_task);
            scoring_tasks.push(scoring_task);
        }

        if self.checker_type().needs_build() {
            let mut checker_compile_task = TaskEntry::new(
                Box::new(CompileTask::new(
                    CompileTaskKind::Checker,
                    Box::new(CheckerCompilationTarget),
                )),
                chal.internal_id,
                chal.priority,
            );
            for scoring_task in &mut scoring_tasks {
                link_task(&mut checker_compile_task, scoring_task);
            }
            tasks.push(checker_compile_task);
        }

        tasks.push(compile_task);
        tasks.extend(exec_tasks);
        tasks.extend(scoring_tasks);
        tasks.push(summary_task);
        tasks
    }
}

/// Lists the non-directory entries of `dir`, returning `(host path, filename)` pairs. Mirrors the
/// reference grader/checker copy-in loops, which copy every sibling file alongside the primary
/// source (auxiliary headers, data files, ...).
fn list_sibling_files(dir: &std::path::Path) -> Vec<(PathBuf, String)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            Some((e.path(), name))
        })
        .collect()
}

/// C/C++ graders ship possibly several `.ext` translation units alongside the user's source; the
/// other compiled languages take only the user's own file plus (for Python) a fixed `grader.py`.
fn is_c_family(compiler: Compiler) -> bool {
    matches!(
        compiler,
        Compiler::GccC11 | Compiler::ClangC11 | Compiler::GccCpp17 | Compiler::ClangCpp17
    )
}

struct UserProgramCompilationTarget;

impl CompilationTarget for UserProgramCompilationTarget {
    fn can_compile(&self, chal: &Challenge) -> bool {
        if !chal.problem_context.has_grader() {
            return true;
        }
        let lang = judge_lang::descriptor(chal.problem_context.userprog_compiler());
        let grader_dir = chal.res_path.join("grader").join(lang.name);
        if !grader_dir.is_dir() {
            set_judge_error(
                chal,
                format!(
                    "{} version grader not supported, please contact the problem setter",
                    lang.name
                ),
            );
            return false;
        }
        if chal.problem_context.userprog_compiler() == Compiler::Python3
            && !grader_dir.join("grader.py").is_file()
        {
            set_judge_error(
                chal,
                "Python3 grader requires grader.py, but it was not found".to_string(),
            );
            return false;
        }
        true
    }

    fn get_source_files(&self, chal: &Challenge) -> Vec<(PathBuf, String)> {
        let lang = judge_lang::descriptor(chal.problem_context.userprog_compiler());
        let mut files = vec![(chal.code_path.clone(), format!("a{}", lang.source_ext))];
        if chal.problem_context.has_grader() {
            let grader_dir = chal.res_path.join("grader").join(lang.name);
            files.extend(list_sibling_files(&grader_dir));
        }
        files
    }

    fn get_source_list(&self, chal: &Challenge) -> Vec<String> {
        let compiler = chal.problem_context.userprog_compiler();
        let lang = judge_lang::descriptor(compiler);
        let mut sources = vec![format!("a{}", lang.source_ext)];
        if chal.problem_context.has_grader() {
            if is_c_family(compiler) {
                let grader_dir = chal.res_path.join("grader").join(lang.name);
                for (_, name) in list_sibling_files(&grader_dir) {
                    if name.ends_with(lang.source_ext) {
                        sources.push(name);
                    }
                }
            }
            if compiler == Compiler::Python3 {
                sources.insert(0, "grader.py".to_string());
            }
        }
        sources
    }

    fn get_compiler(&self, chal: &Challenge) -> Compiler {
        chal.problem_context.userprog_compiler()
    }

    fn get_compile_args(&self, chal: &Challenge) -> Vec<String> {
        chal.problem_context.userprog_compile_args()
    }

    fn get_output_name(&self, chal: &Challenge) -> String {
        let lang = judge_lang::descriptor(chal.problem_context.userprog_compiler());
        format!("a{}", lang.executable_ext)
    }

    fn on_compile_success(&self, chal: &Challenge, artifact_name: &str) {
        chal.problem_context
            .set_userprog_path(chal.sandbox_box.file_path(artifact_name));
    }

    fn on_compile_failure(&self, chal: &Challenge, status: SandboxStatus, stderr: Option<String>) {
        let mut result = chal.result.lock().unwrap();
        if let Some(stderr) = stderr {
            result.total_result.ce_message = stderr;
            result.total_result.message_type = MessageType::Text;
        }
        result.total_result.status = Some(match status {
            SandboxStatus::NonzeroExitStatus | SandboxStatus::Signalled => Status::CompileError,
            SandboxStatus::TimeLimitExceeded
            | SandboxStatus::MemoryLimitExceeded
            | SandboxStatus::OutputLimitExceeded => Status::CompileLimitExceeded,
            _ => Status::InternalError,
        });
    }
}

struct CheckerCompilationTarget;

impl CompilationTarget for CheckerCompilationTarget {
    fn can_compile(&self, chal: &Challenge) -> bool {
        let Some(compiler) = chal.problem_context.checker_compiler() else {
            set_judge_error(chal, "checker compiler not configured".to_string());
            return false;
        };
        let lang = judge_lang::descriptor(compiler);
        let checker_name = format!("checker{}", lang.source_ext);
        let checker_path = chal.res_path.join("checker").join(&checker_name);
        if !checker_path.is_file() {
            set_judge_error(
                chal,
                format!(
                    "{checker_name} not found, please contact the problem setter"
                ),
            );
            return false;
        }
        true
    }

    fn get_source_files(&self, chal: &Challenge) -> Vec<(PathBuf, String)> {
        let Some(compiler) = chal.problem_context.checker_compiler() else {
            return Vec::new();
        };
        let lang = judge_lang::descriptor(compiler);
        let checker_name = format!("checker{}", lang.source_ext);
        let checker_dir = chal.res_path.join("checker");
        let mut files = vec![(checker_dir.join(&checker_name), checker_name)];
        files.extend(
            list_sibling_files(&checker_dir)
                .into_iter()
                .filter(|(_, name)| !name.ends_with(lang.source_ext)),
        );
        files
    }

    fn get_source_list(&self, chal: &Challenge) -> Vec<String> {
        let Some(compiler) = chal.problem_context.checker_compiler() else {
            return Vec::new();
        };
        vec![format!("checker{}", judge_lang::descriptor(compiler).source_ext)]
    }

    fn get_compiler(&self, chal: &Challenge) -> Compiler {
        chal.problem_context
            .checker_compiler()
            .expect("checker compilation target requires a checker compiler")
    }

    fn get_compile_args(&self, chal: &Challenge) -> Vec<String> {
        chal.problem_context.checker_compile_args()
    }

    fn get_output_name(&self, chal: &Challenge) -> String {
        let compiler = self.get_compiler(chal);
        format!("checker{}", judge_lang::descriptor(compiler).executable_ext)
    }

    fn on_compile_success(&self, chal: &Challenge, artifact_name: &str) {
        chal.problem_context
            .set_checker_path(chal.sandbox_box.file_path(artifact_name));
    }

    fn on_compile_failure(&self, chal: &Challenge, _status: SandboxStatus, stderr: Option<String>) {
        let mut result = chal.result.lock().unwrap();
        result.total_result.status = Some(Status::JudgeError);
        result.total_result.message_type = MessageType::Text;
        if let Some(stderr) = stderr {
            result.total_result.ie_message = stderr;
        }
    }
}

fn set_judge_error(chal: &Challenge, message: String) {
    let mut result = chal.result.lock().unwrap();
    result.total_result.status = Some(Status::JudgeError);
    result.total_result.ie_message = message;
    result.total_result.message_type = MessageType::Text;
}
