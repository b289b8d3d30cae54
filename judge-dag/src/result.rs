//! The result tree: `TotalResult` + per-subtask + per-testdata results (§3).

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{MessageType, Status};

/// Result of a single testdata's execution and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDataResult {
    pub id: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    /// Time used, in nanoseconds.
    pub time: u64,
    /// Memory used, in bytes.
    pub memory: u64,
    pub message: String,
    pub message_type: MessageType,
    /// `None` until a task that decides it runs; see the "may be null" invariant in §3.
    pub status: Option<Status>,
}

impl TestDataResult {
    pub fn new(id: u32) -> Self {
        TestDataResult {
            id,
            score: Decimal::ZERO,
            time: 0,
            memory: 0,
            message: String::new(),
            message_type: MessageType::None,
            status: None,
        }
    }
}

/// Accumulated result of one subtask.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubtaskResult {
    pub time: u64,
    pub memory: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    pub status: Option<Status>,
}

/// The overall verdict of a challenge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TotalResult {
    pub time: u64,
    pub memory: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    pub status: Option<Status>,
    /// Compile-error text for the user program, set on `CompileError`/`CompileLimitExceeded`.
    pub ce_message: String,
    /// Internal-error text, set on `JudgeError`/`InternalError`.
    pub ie_message: String,
    pub message_type: MessageType,
}

/// The full result tree for one challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub chal_id: u64,
    pub total_result: TotalResult,
    pub subtask_results: HashMap<u32, SubtaskResult>,
    pub testdata_results: HashMap<u32, TestDataResult>,
}

impl ChallengeResult {
    pub fn new(chal_id: u64) -> Self {
        ChallengeResult {
            chal_id,
            total_result: TotalResult::default(),
            subtask_results: HashMap::new(),
            testdata_results: HashMap::new(),
        }
    }

    /// Fill every undecided sub-status with `InternalError` and zero out the accumulated totals.
    ///
    /// This is the uncaught-worker-failure path of §4.1: a panic or propagated error in any
    /// task's `setup`/`run`/`finish` is caught by the worker and funneled through here before a
    /// summary report is still sent.
    pub fn collapse_to_internal_error(&mut self, ie_message: Option<String>) {
        self.total_result.status = Some(Status::InternalError);
        self.total_result.time = 0;
        self.total_result.memory = 0;
        self.total_result.score = Decimal::ZERO;
        if let Some(msg) = ie_message {
            self.total_result.ie_message = msg;
            self.total_result.message_type = MessageType::Text;
        }
        for subtask_result in self.subtask_results.values_mut() {
            if subtask_result.status.is_none() {
                subtask_result.time = 0;
                subtask_result.memory = 0;
                subtask_result.score = Decimal::ZERO;
                subtask_result.status = Some(Status::InternalError);
            }
        }
        for testdata_result in self.testdata_results.values_mut() {
            if testdata_result.status.is_none() {
                testdata_result.time = 0;
                testdata_result.memory = 0;
                testdata_result.score = Decimal::ZERO;
                testdata_result.status = Some(Status::InternalError);
            }
        }
    }
}
