//! Challenge construction (§2 "Control Endpoint", §3): turns a parsed [`SubmissionMessage`] into a
//! `Challenge` with its result tree pre-seeded (one null-status entry per testdata and subtask, as
//! only the builder knows the full id set up front) and its task DAG built, ready to hand to the
//! scheduler.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use judge_dag::{ChallengeResult, SubtaskResult, TestDataResult};
use judge_exec::problem::batch::BatchConfig;
use judge_exec::{build_problem_context, Challenge, OutputArchive, Reporter, Subtask, TaskEntry};
use judge_store::ChallengeBox;

use crate::config::Config;
use crate::message::SubmissionMessage;

/// Build a `Challenge` plus its task DAG from an inbound submission, using `reporter` to stream
/// every report the DAG produces.
pub fn build_challenge(
    msg: SubmissionMessage,
    config: &Config,
    reporter: Reporter,
) -> Result<(Arc<Challenge>, Vec<TaskEntry>)> {
    let userprog_compile_args = shell_words::split(&msg.userprog_compile_args)
        .context("failed to shell-split userprog_compile_args")?;
    let checker_compile_args = shell_words::split(&msg.checker_compile_args)
        .context("failed to shell-split checker_compile_args")?;
    let summary_compile_args = shell_words::split(&msg.summary_compile_args)
        .context("failed to shell-split summary_compile_args")?;

    let batch_config = BatchConfig {
        userprog_compiler: msg.userprog_compiler,
        userprog_compile_args,
        has_grader: msg.has_grader,
        checker_type: msg.checker_type,
        checker_compiler: msg.checker_compiler,
        checker_compile_args,
        summary_type: msg.summary_type,
        summary_compiler: msg.summary_compiler,
        summary_compile_args,
    };
    let problem_context = build_problem_context(&msg.problem_type, &batch_config)?;

    let limits = msg.limit.map(Into::into).unwrap_or_default();

    let code_path = PathBuf::from(&msg.code_path);
    let res_path = PathBuf::from(&msg.res_path);

    let chal_box = ChallengeBox::new(&config.sandbox_root, msg.chal_id)
        .with_context(|| format!("failed to allocate scratch box for challenge {}", msg.chal_id))?;

    // `ProblemContext::create_testdata` needs an already-constructed `Challenge` to call (it
    // reads `chal.res_path`), but the challenge can't exist before its testdata map does. Since
    // every problem type resolves a testdata's paths the same way (`res_path/testdata/<name>`),
    // build the entries directly here instead of through the trait method.
    let mut result = ChallengeResult::new(msg.chal_id);
    let mut testdatas = HashMap::new();
    for td in &msg.testdatas {
        let testdata = judge_exec::TestData::new(
            td.id,
            res_path.join("testdata").join(&td.input),
            res_path.join("testdata").join(&td.output),
        );
        testdatas.insert(td.id, testdata);
        result.testdata_results.insert(td.id, TestDataResult::new(td.id));
    }

    let mut subtasks = HashMap::new();
    for st in &msg.subtasks {
        for &tid in &st.testdatas {
            if let Some(testdata) = testdatas.get_mut(&tid) {
                testdata.subtasks.insert(st.id);
            }
        }
        subtasks.insert(
            st.id,
            Subtask {
                id: st.id,
                score: st.score,
                testdata_ids: st.testdatas.clone(),
                dependency_subtasks: st.dependency_subtasks.clone(),
            },
        );
        result.subtask_results.insert(st.id, SubtaskResult::default());
    }

    let skip_subtasks: HashSet<u32> = msg.skip_subtasks.into_iter().collect();

    let mut chal = Challenge::new(
        msg.chal_id,
        msg.pro_id,
        msg.contest_id,
        msg.acct_id,
        msg.priority,
        code_path.clone(),
        res_path,
        config.checker_dir.clone(),
        limits,
        msg.skip_nonac,
        skip_subtasks,
        testdatas,
        subtasks,
        result,
        reporter,
        chal_box,
        problem_context.clone(),
    )
    .with_cpuset(config.cpuset.clone());

    if config.archive_outputs {
        let archive_path = code_path
            .parent()
            .map(|p| p.join("output.zip"))
            .unwrap_or_else(|| PathBuf::from("output.zip"));
        let archive = OutputArchive::create(&archive_path)
            .with_context(|| format!("failed to open output archive at {archive_path:?}"))?;
        chal = chal.with_archive(Arc::new(archive));
    }

    let chal = Arc::new(chal);
    let dag = problem_context.build_task_dag(&chal);

    Ok((chal, dag))
}
