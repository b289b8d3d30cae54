//! Wire-stable enumerations and small value types (§6 of the specification).

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Resource limits for a single execution, as submitted by the backend.
///
/// Time is in nanoseconds, memory and output in bytes: the wire-facing unit. Sandbox-facing code
/// (in `judge-store`) converts to milliseconds / kibibytes at the boundary, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Time limit, in nanoseconds.
    pub time: u64,
    /// Memory limit, in bytes.
    pub memory: u64,
    /// Output limit, in bytes.
    pub output: u64,
}

impl Default for Limits {
    /// The defaults the original backend falls back to when a submission omits `limit` entirely:
    /// 1000ms / 256MiB / 64MiB.
    fn default() -> Self {
        Limits {
            time: 1000 * 10u64.pow(6),
            memory: 262_144 * 1024,
            output: 64 * 1024 * 1024,
        }
    }
}

/// Compiler identifiers, wire-stable (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Compiler {
    GccC11 = 1,
    ClangC11 = 2,
    GccCpp17 = 3,
    ClangCpp17 = 4,
    Rust = 5,
    Python3 = 6,
    Java = 7,
    AsmWithLibc = 8,
    AsmWithLibstdcpp = 9,
}

/// Checker variants, wire-stable (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CheckerType {
    Diff = 1,
    DiffStrict = 2,
    DiffFloat4 = 3,
    DiffFloat6 = 4,
    DiffFloat9 = 5,
    CmsTpsTestlib = 6,
    StdTestlib = 7,
    Ioredir = 8,
    Toj = 9,
}

impl CheckerType {
    /// Checker types that require a checker source file to be compiled before scoring.
    pub fn needs_build(self) -> bool {
        matches!(
            self,
            CheckerType::CmsTpsTestlib | CheckerType::StdTestlib | CheckerType::Toj
        )
    }

    /// Checker types that award fractional credit (as opposed to all-or-nothing).
    pub fn awards_fractional_credit(self) -> bool {
        matches!(
            self,
            CheckerType::CmsTpsTestlib | CheckerType::StdTestlib | CheckerType::Toj
        )
    }
}

/// Scoring aggregator for a subtask's testdata scores, wire-stable (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SummaryType {
    /// `subtask.weight * min(testdata.score)`.
    GroupMin = 1,
    /// `min(testdata.score)`, unweighted.
    Overwrite = 2,
    /// Reserved for a custom summary compiler; not implemented by the core.
    Custom = 3,
}

/// The per-testdata / per-subtask / overall verdict. The numeric order encodes severity: higher
/// values "dominate" lower ones when aggregating (§4.5), with the exception of `Skipped` which is
/// excluded from that aggregation and only used as a terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Status {
    Accepted = 1,
    PartialCorrect = 2,
    WrongAnswer = 3,
    RuntimeError = 4,
    RuntimeErrorSignalled = 5,
    TimeLimitExceeded = 6,
    MemoryLimitExceeded = 7,
    OutputLimitExceeded = 8,
    CompileError = 9,
    CompileLimitExceeded = 10,
    InternalError = 11,
    JudgeError = 12,
    Skipped = 102,
}

impl Status {
    /// Whether this status counts as a passing result for scoring/dependency purposes.
    pub fn is_passing(self) -> bool {
        matches!(self, Status::Accepted | Status::PartialCorrect)
    }
}

/// The format of an optional message attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageType {
    None = 1,
    Text = 2,
    Html = 3,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::None
    }
}

/// The outcome of one sandboxed run, as reported by the Sandbox Gateway (§6). Internal to the
/// boundary between `judge-store` and the task state machines in `judge-exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Normal = 1,
    TimeLimitExceeded = 2,
    MemoryLimitExceeded = 3,
    OutputLimitExceeded = 4,
    DisallowedSyscall = 5,
    Signalled = 6,
    NonzeroExitStatus = 7,
    RunnerError = 8,
}

/// Canonical description of the signal that terminated a user program, used to fill in
/// `TestDataResult.message` for `RuntimeErrorSignalled` (§4.3).
pub fn signal_error_message(exit_code: i32) -> Option<&'static str> {
    match exit_code {
        4 => Some("illegal hardware instruction"),
        6 => Some("abort"),
        8 => Some("floating point exception"),
        11 => Some("segmentation fault"),
        _ => None,
    }
}
