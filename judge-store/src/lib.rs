//! The Sandbox Gateway and the per-challenge scratch box (§2.1 of the specification): the only
//! crate in the workspace that talks to `tabox` or the filesystem on the engine's behalf.

mod box_store;
mod sandbox;

pub use box_store::ChallengeBox;
pub use sandbox::{run_sandbox, BindPath, SandboxOutcome, SandboxParams, READABLE_DIRS};
