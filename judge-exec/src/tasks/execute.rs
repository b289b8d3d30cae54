//! Execute: runs the compiled user program against one testdata's input (§4.3).

use std::fs;
use std::path::PathBuf;

use judge_dag::{signal_error_message, Compiler, MessageType, SandboxStatus, Status};
use judge_store::{run_sandbox, SandboxParams};

use crate::challenge::Challenge;
use crate::task_entry::{Task, TaskEntry};

pub struct ExecuteTask {
    testdata_id: u32,
}

impl ExecuteTask {
    pub fn new(testdata_id: u32) -> Self {
        ExecuteTask { testdata_id }
    }

    fn fail_internal(&self, chal: &Challenge) {
        let mut result = chal.result.lock().unwrap();
        result
            .testdata_results
            .get_mut(&self.testdata_id)
            .unwrap()
            .status = Some(Status::InternalError);
    }
}

impl Task for ExecuteTask {
    fn setup(&self, chal: &Challenge, _entry: &TaskEntry) -> bool {
        if chal.total_status().is_some() {
            return false;
        }

        let testdata = &chal.testdatas[&self.testdata_id];
        if chal.skip_nonac && chal.all_subtasks_already_skipped(&testdata.subtasks) {
            let payload = {
                let mut result = chal.result.lock().unwrap();
                let testdata_result = result.testdata_results.get_mut(&self.testdata_id).unwrap();
                testdata_result.status = Some(Status::Skipped);
                serde_json::json!({
                    "chal_id": chal.chal_id,
                    "task": "execute",
                    "testdata_result": testdata_result.clone(),
                })
            };
            (chal.reporter)(payload);
            return false;
        }

        true
    }

    fn run(&self, chal: &Challenge, _entry: &TaskEntry) {
        let testdata = chal.testdatas[&self.testdata_id].clone();

        let Some(userprog_path) = chal.problem_context.userprog_path() else {
            self.fail_internal(chal);
            return;
        };

        let compiler = chal.problem_context.userprog_compiler();
        let descriptor = judge_lang::descriptor(compiler);
        let main_class = (compiler == Compiler::Java).then(|| {
            if chal.problem_context.has_grader() {
                "grader"
            } else {
                "main"
            }
        });
        let executable_name = format!("a{}", descriptor.executable_ext);
        let (exe, args) = (descriptor.build_execute_argv)(&executable_name, main_class, &[]);

        let workdir = match chal.sandbox_box.alloc_workdir() {
            Ok(workdir) => workdir,
            Err(_) => {
                self.fail_internal(chal);
                return;
            }
        };

        if fs::copy(&userprog_path, workdir.join(&executable_name)).is_err() {
            self.fail_internal(chal);
            chal.sandbox_box.remove_workdir(&workdir);
            return;
        }

        let stdout_path = workdir.join("stdout");
        let params = SandboxParams {
            exe_path: PathBuf::from(&exe),
            args,
            time_limit_ms: chal.limits.time / 1_000_000,
            memory_limit_kib: chal.limits.memory / 1024,
            output_limit_kib: chal.limits.output / 1024,
            proc_limit: descriptor.allow_thread_count,
            stdin: Some(testdata.input_path.clone()),
            stdout: Some(stdout_path.clone()),
            allow_proc: descriptor.allow_thread_count > 1,
            allow_mount_proc: compiler == Compiler::Java,
            cpuset: chal.next_cpuset(),
            ..Default::default()
        };

        let outcome = run_sandbox(&params, &workdir);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                self.fail_internal(chal);
                chal.sandbox_box.remove_workdir(&workdir);
                return;
            }
        };

        if matches!(
            outcome.status,
            SandboxStatus::Normal | SandboxStatus::OutputLimitExceeded
        ) && stdout_path.is_file()
        {
            if let Some(archive) = &chal.archive {
                if let Ok(data) = fs::read(&stdout_path) {
                    let entry_name = format!("{}.out", testdata.id);
                    if let Err(e) = archive.write_file(&entry_name, &data) {
                        log::warn!(
                            "challenge {}: failed to archive output for testdata {}: {e}",
                            chal.chal_id,
                            testdata.id
                        );
                    }
                }
            }
            let dst = chal.sandbox_box.file_path(&testdata.useroutput_name());
            let _ = fs::rename(&stdout_path, &dst);
        }
        chal.sandbox_box.remove_workdir(&workdir);

        let mut result = chal.result.lock().unwrap();
        let testdata_result = result.testdata_results.get_mut(&self.testdata_id).unwrap();
        testdata_result.time = outcome.time_ns;
        testdata_result.memory = outcome.memory_bytes;
        testdata_result.status = Some(match outcome.status {
            SandboxStatus::Normal => Status::Accepted,
            SandboxStatus::TimeLimitExceeded => Status::TimeLimitExceeded,
            SandboxStatus::MemoryLimitExceeded => Status::MemoryLimitExceeded,
            SandboxStatus::OutputLimitExceeded => Status::OutputLimitExceeded,
            SandboxStatus::NonzeroExitStatus => Status::RuntimeError,
            SandboxStatus::Signalled | SandboxStatus::DisallowedSyscall => {
                Status::RuntimeErrorSignalled
            }
            SandboxStatus::RunnerError => Status::InternalError,
        });

        if matches!(
            outcome.status,
            SandboxStatus::Signalled | SandboxStatus::DisallowedSyscall
        ) {
            if let Some(message) = signal_error_message(outcome.signal.unwrap_or(0)) {
                testdata_result.message = message.to_string();
                testdata_result.message_type = MessageType::Text;
            }
        }
    }

    fn finish(&self, chal: &Challenge, _entry: &TaskEntry) {
        let testdata = chal.testdatas[&self.testdata_id].clone();
        let (payload, passed) = {
            let result = chal.result.lock().unwrap();
            let testdata_result = result.testdata_results[&self.testdata_id].clone();
            let passed = testdata_result.status == Some(Status::Accepted);
            (
                serde_json::json!({
                    "chal_id": chal.chal_id,
                    "task": "execute",
                    "testdata_result": testdata_result,
                }),
                passed,
            )
        };
        (chal.reporter)(payload);

        if !passed {
            chal.mark_subtasks_skipped(testdata.subtasks.iter().copied());
            let _ = chal.sandbox_box.delete_file(&testdata.useroutput_name());
        }
    }
}
