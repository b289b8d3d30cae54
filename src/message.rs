//! Submission messages (§6 "Control channel — submission message"): the inbound shape accepted on
//! the control endpoint, one per challenge.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use judge_dag::{CheckerType, Compiler, Limits, SummaryType};

/// A single inbound text frame, one challenge (§6's table, plus the §C.2/§C.4 supplements:
/// `skip_subtasks` and a defaulted `contest_id`).
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionMessage {
    pub chal_id: u64,
    pub pro_id: u64,
    #[serde(default)]
    pub contest_id: u64,
    pub acct_id: u64,
    #[serde(default)]
    pub priority: i64,

    pub code_path: String,
    pub res_path: String,

    #[serde(default = "default_problem_type")]
    pub problem_type: String,

    pub userprog_compiler: Compiler,
    #[serde(default)]
    pub userprog_compile_args: String,
    #[serde(default)]
    pub has_grader: bool,

    pub checker_type: CheckerType,
    #[serde(default)]
    pub checker_compiler: Option<Compiler>,
    #[serde(default)]
    pub checker_compile_args: String,

    #[serde(default = "default_summary_type")]
    pub summary_type: SummaryType,
    #[serde(default)]
    pub summary_compiler: Option<Compiler>,
    #[serde(default)]
    pub summary_compile_args: String,

    #[serde(default)]
    pub limit: Option<LimitMessage>,

    pub testdatas: Vec<TestDataMessage>,
    pub subtasks: Vec<SubtaskMessage>,

    #[serde(default)]
    pub skip_nonac: bool,
    /// Subtask ids to seed `chal.skip_subtasks` with before the DAG starts (§C.2 of
    /// SPEC_FULL.md) — not in the original spec.md table.
    #[serde(default)]
    pub skip_subtasks: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitMessage {
    pub time: u64,
    pub memory: u64,
    pub output: u64,
}

impl From<LimitMessage> for Limits {
    fn from(m: LimitMessage) -> Self {
        Limits {
            time: m.time,
            memory: m.memory,
            output: m.output,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestDataMessage {
    pub id: u32,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubtaskMessage {
    pub id: u32,
    pub score: rust_decimal::Decimal,
    pub testdatas: Vec<u32>,
    #[serde(default)]
    pub dependency_subtasks: Vec<u32>,
}

fn default_problem_type() -> String {
    "batch".to_string()
}

fn default_summary_type() -> SummaryType {
    SummaryType::GroupMin
}

/// Errors the control endpoint can distinguish while parsing an inbound frame (§B.2 of
/// SPEC_FULL.md): enough detail to decide whether a `chal_id` was even recovered, so the endpoint
/// can still echo one in its rejection report when possible.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed submission message: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error("unknown problem type: {0}")]
    UnknownProblemType(String),
    #[error("duplicate testdata id: {0}")]
    DuplicateTestData(u32),
    #[error("duplicate subtask id: {0}")]
    DuplicateSubtask(u32),
    #[error("subtask {subtask} references unknown testdata {testdata}")]
    UnknownTestDataRef { subtask: u32, testdata: u32 },
    #[error("subtask {subtask} depends on unknown subtask {dependency}")]
    UnknownSubtaskDependencyRef { subtask: u32, dependency: u32 },
}

pub fn parse_submission(text: &str) -> Result<SubmissionMessage, MessageError> {
    let msg: SubmissionMessage = serde_json::from_str(text)?;

    if msg.problem_type != "batch" {
        return Err(MessageError::UnknownProblemType(msg.problem_type.clone()));
    }

    let mut seen_testdata = HashMap::new();
    for td in &msg.testdatas {
        if seen_testdata.insert(td.id, ()).is_some() {
            return Err(MessageError::DuplicateTestData(td.id));
        }
    }
    let mut seen_subtask = HashMap::new();
    for st in &msg.subtasks {
        if seen_subtask.insert(st.id, ()).is_some() {
            return Err(MessageError::DuplicateSubtask(st.id));
        }
    }
    for st in &msg.subtasks {
        for &tid in &st.testdatas {
            if !seen_testdata.contains_key(&tid) {
                return Err(MessageError::UnknownTestDataRef {
                    subtask: st.id,
                    testdata: tid,
                });
            }
        }
        for &dep in &st.dependency_subtasks {
            if !seen_subtask.contains_key(&dep) {
                return Err(MessageError::UnknownSubtaskDependencyRef {
                    subtask: st.id,
                    dependency: dep,
                });
            }
        }
    }

    Ok(msg)
}
