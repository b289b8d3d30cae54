//! The wire-stable data model shared by every crate in the workspace (§3, §6 of the
//! specification): the enumerations, `Limits`, and the result tree (`TotalResult` +
//! `SubtaskResult` + `TestDataResult`).
//!
//! This crate has no I/O, no sandboxing, and no notion of a task graph: it's the vocabulary every
//! other crate shares. The submission-specific aggregate (`Challenge`, `TestData`, `Subtask`) and
//! the task graph itself live in `judge-exec`, next to the code that builds and runs them.

mod result;
mod types;

pub use result::*;
pub use types::*;
