//! Scoring: applies the configured checker to one testdata's captured output (§4.4).

use std::fs;
use std::path::PathBuf;

use judge_dag::{CheckerType, Compiler, MessageType, SandboxStatus, Status};
use judge_store::{run_sandbox, SandboxParams};
use rust_decimal::Decimal;

use crate::challenge::{Challenge, TestData};
use crate::task_entry::{Task, TaskEntry};

const CHECKER_TIME_LIMIT_MS: u64 = 2_000;
const CHECKER_MEMORY_LIMIT_KIB: u64 = 262_144;
const CHECKER_STACK_LIMIT_KIB: u64 = 65_536;

/// Bundled default checkers for the DIFF family, resolved against the engine's
/// `default_checker_dir` (§4.4's "built-in checker" note).
fn default_checker_name(checker_type: CheckerType) -> Option<&'static str> {
    match checker_type {
        CheckerType::Diff => Some("lcmp"),
        CheckerType::DiffStrict => Some("fcmp"),
        CheckerType::DiffFloat4 => Some("rcmp4"),
        CheckerType::DiffFloat6 => Some("rcmp6"),
        CheckerType::DiffFloat9 => Some("rcmp9"),
        _ => None,
    }
}

pub struct ScoringTask {
    testdata_id: u32,
}

impl ScoringTask {
    pub fn new(testdata_id: u32) -> Self {
        ScoringTask { testdata_id }
    }

    fn set_judge_error(&self, chal: &Challenge, message: &str) {
        let mut result = chal.result.lock().unwrap();
        let testdata_result = result.testdata_results.get_mut(&self.testdata_id).unwrap();
        testdata_result.status = Some(Status::JudgeError);
        testdata_result.time = 0;
        testdata_result.memory = 0;
        testdata_result.message = message.to_string();
        testdata_result.message_type = MessageType::Text;
    }

    fn run_diff(&self, chal: &Challenge, testdata: &TestData, checker_type: CheckerType) {
        let checker_name =
            default_checker_name(checker_type).expect("run_diff called for a non-DIFF checker");
        let checker_path = chal.default_checker_dir.join(checker_name);

        let Some(useroutput) = chal.sandbox_box.get_file(&testdata.useroutput_name()) else {
            self.set_judge_error(chal, "missing captured program output");
            return;
        };

        let workdir = match chal.sandbox_box.alloc_workdir() {
            Ok(workdir) => workdir,
            Err(_) => {
                self.set_judge_error(chal, "failed to allocate checker workdir");
                return;
            }
        };
        if fs::copy(&testdata.input_path, workdir.join("in")).is_err()
            || fs::copy(&testdata.output_path, workdir.join("out")).is_err()
            || fs::copy(&useroutput, workdir.join("ans")).is_err()
        {
            self.set_judge_error(chal, "failed to stage checker workdir");
            chal.sandbox_box.remove_workdir(&workdir);
            return;
        }

        let params = SandboxParams {
            exe_path: checker_path,
            args: vec!["in".to_string(), "out".to_string(), "ans".to_string()],
            time_limit_ms: CHECKER_TIME_LIMIT_MS,
            memory_limit_kib: CHECKER_MEMORY_LIMIT_KIB,
            stack_limit_kib: CHECKER_STACK_LIMIT_KIB,
            ..Default::default()
        };
        let outcome = run_sandbox(&params, &workdir);
        chal.sandbox_box.remove_workdir(&workdir);

        let status = match outcome {
            Ok(o) if o.status == SandboxStatus::Normal => Status::Accepted,
            Ok(_) => Status::WrongAnswer,
            Err(_) => Status::JudgeError,
        };
        let mut result = chal.result.lock().unwrap();
        result
            .testdata_results
            .get_mut(&self.testdata_id)
            .unwrap()
            .status = Some(status);
    }

    fn run_testlib(&self, chal: &Challenge, testdata: &TestData, checker_type: CheckerType) {
        let (Some(checker_path), Some(compiler), Some(useroutput)) = (
            chal.problem_context.checker_path(),
            chal.problem_context.checker_compiler(),
            chal.sandbox_box.get_file(&testdata.useroutput_name()),
        ) else {
            self.set_judge_error(chal, "missing checker executable or captured output");
            return;
        };

        let descriptor = judge_lang::descriptor(compiler);
        let checker_exe_name = format!("checker{}", descriptor.executable_ext);
        let main_class = (compiler == Compiler::Java).then_some("checker");
        let (exe, args) = (descriptor.build_execute_argv)(
            &checker_exe_name,
            main_class,
            &["in".to_string(), "out".to_string(), "ans".to_string()],
        );

        let workdir = match chal.sandbox_box.alloc_workdir() {
            Ok(workdir) => workdir,
            Err(_) => {
                self.set_judge_error(chal, "failed to allocate checker workdir");
                return;
            }
        };
        if fs::copy(&checker_path, workdir.join(&checker_exe_name)).is_err()
            || fs::copy(&testdata.input_path, workdir.join("in")).is_err()
            || fs::copy(&testdata.output_path, workdir.join("out")).is_err()
            || fs::copy(&useroutput, workdir.join("ans")).is_err()
        {
            self.set_judge_error(chal, "failed to stage checker workdir");
            chal.sandbox_box.remove_workdir(&workdir);
            return;
        }

        let stdout_path = workdir.join("checker-stdout");
        let stderr_path = workdir.join("checker-stderr");
        let params = SandboxParams {
            exe_path: PathBuf::from(&exe),
            args,
            time_limit_ms: CHECKER_TIME_LIMIT_MS,
            memory_limit_kib: CHECKER_MEMORY_LIMIT_KIB,
            stack_limit_kib: CHECKER_STACK_LIMIT_KIB,
            proc_limit: descriptor.allow_thread_count,
            stdout: Some(stdout_path.clone()),
            stderr: Some(stderr_path.clone()),
            allow_proc: descriptor.allow_thread_count > 1,
            ..Default::default()
        };

        let outcome = run_sandbox(&params, &workdir);
        let stdout_text = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr_text = fs::read_to_string(&stderr_path).unwrap_or_default();
        chal.sandbox_box.remove_workdir(&workdir);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                self.set_judge_error(chal, "checker runtime error");
                return;
            }
        };

        match checker_type {
            CheckerType::CmsTpsTestlib => self.finish_cms_tps(chal, &outcome, &stdout_text, &stderr_text),
            CheckerType::StdTestlib => self.finish_std_testlib(chal, &outcome, &stdout_text, &stderr_text),
            _ => unreachable!("run_testlib called for a checker type that isn't testlib-based"),
        }
    }

    fn finish_cms_tps(
        &self,
        chal: &Challenge,
        outcome: &judge_store::SandboxOutcome,
        stdout_text: &str,
        stderr_text: &str,
    ) {
        if outcome.status != SandboxStatus::Normal {
            self.set_judge_error(chal, "checker runtime error");
            return;
        }

        let message = stderr_text.lines().next().unwrap_or("").to_string();
        let score = stdout_text.lines().next().unwrap_or("").trim().parse::<Decimal>();

        let mut result = chal.result.lock().unwrap();
        let testdata_result = result.testdata_results.get_mut(&self.testdata_id).unwrap();
        if !message.is_empty() {
            testdata_result.message = message;
            testdata_result.message_type = MessageType::Text;
        }
        match score {
            Ok(score) => {
                testdata_result.status = Some(if score >= Decimal::ONE {
                    Status::Accepted
                } else if score <= Decimal::ZERO {
                    Status::WrongAnswer
                } else {
                    Status::PartialCorrect
                });
                testdata_result.score = score;
            }
            Err(_) => {
                testdata_result.status = Some(Status::JudgeError);
                testdata_result.time = 0;
                testdata_result.memory = 0;
                testdata_result.message = "invalid score".to_string();
                testdata_result.message_type = MessageType::Text;
            }
        }
    }

    fn finish_std_testlib(
        &self,
        chal: &Challenge,
        outcome: &judge_store::SandboxOutcome,
        stdout_text: &str,
        stderr_text: &str,
    ) {
        if !matches!(
            outcome.status,
            SandboxStatus::Normal | SandboxStatus::NonzeroExitStatus
        ) {
            self.set_judge_error(chal, "checker runtime error");
            return;
        }

        let mut result = chal.result.lock().unwrap();
        let testdata_result = result.testdata_results.get_mut(&self.testdata_id).unwrap();

        match outcome.exit_code {
            0 => testdata_result.status = Some(Status::Accepted),
            1 | 2 => testdata_result.status = Some(Status::WrongAnswer),
            3 => {
                testdata_result.status = Some(Status::JudgeError);
                testdata_result.time = 0;
                testdata_result.memory = 0;
                testdata_result.message = "checker internal error".to_string();
                testdata_result.message_type = MessageType::Text;
                return;
            }
            7 => {
                testdata_result.status = Some(Status::PartialCorrect);
                let line = stderr_text.lines().next().unwrap_or("");
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next().map(str::parse::<Decimal>)) {
                    (Some("points"), Some(Ok(score))) => testdata_result.score = score,
                    _ => {
                        testdata_result.status = Some(Status::JudgeError);
                        testdata_result.score = Decimal::ZERO;
                    }
                }
            }
            _ => {
                testdata_result.status = Some(Status::JudgeError);
                testdata_result.time = 0;
                testdata_result.memory = 0;
                return;
            }
        }

        if !stdout_text.is_empty() {
            testdata_result.message = stdout_text.to_string();
            testdata_result.message_type = MessageType::Text;
        }
    }
}

impl Task for ScoringTask {
    fn setup(&self, chal: &Challenge, _entry: &TaskEntry) -> bool {
        let result = chal.result.lock().unwrap();
        if matches!(
            result.total_result.status,
            Some(Status::CompileError) | Some(Status::CompileLimitExceeded) | Some(Status::JudgeError)
        ) {
            return false;
        }

        // The TOJ format checker (a stub today) accepts every upstream execution status;
        // every other checker only scores a testdata whose program run was itself accepted.
        if chal.problem_context.checker_type() == CheckerType::Toj {
            return true;
        }
        result.testdata_results[&self.testdata_id].status == Some(Status::Accepted)
    }

    fn run(&self, chal: &Challenge, _entry: &TaskEntry) {
        let testdata = chal.testdatas[&self.testdata_id].clone();
        let checker_type = chal.problem_context.checker_type();

        match checker_type {
            CheckerType::Diff
            | CheckerType::DiffStrict
            | CheckerType::DiffFloat4
            | CheckerType::DiffFloat6
            | CheckerType::DiffFloat9 => self.run_diff(chal, &testdata, checker_type),
            CheckerType::CmsTpsTestlib | CheckerType::StdTestlib => {
                self.run_testlib(chal, &testdata, checker_type)
            }
            CheckerType::Ioredir | CheckerType::Toj => {
                let mut result = chal.result.lock().unwrap();
                let testdata_result = result.testdata_results.get_mut(&self.testdata_id).unwrap();
                testdata_result.status = Some(Status::JudgeError);
                testdata_result.message = format!("{checker_type:?} checker is not implemented");
                testdata_result.message_type = MessageType::Text;
            }
        }
    }

    fn finish(&self, chal: &Challenge, _entry: &TaskEntry) {
        let testdata = chal.testdatas[&self.testdata_id].clone();
        let (payload, passed) = {
            let result = chal.result.lock().unwrap();
            let testdata_result = result.testdata_results[&self.testdata_id].clone();
            let passed = testdata_result
                .status
                .map(Status::is_passing)
                .unwrap_or(false);
            (
                serde_json::json!({
                    "chal_id": chal.chal_id,
                    "task": "scoring",
                    "testdata_result": testdata_result,
                }),
                passed,
            )
        };
        (chal.reporter)(payload);

        if !passed {
            chal.mark_subtasks_skipped(testdata.subtasks.iter().copied());
        }
        let _ = chal.sandbox_box.delete_file(&testdata.useroutput_name());
    }
}
