//! `Challenge`, `TestData` and `Subtask` — the per-submission entities of §3.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;

use judge_dag::{ChallengeResult, Limits, Status};
use judge_store::ChallengeBox;

use crate::archive::OutputArchive;
use crate::problem::ProblemContext;

static NEXT_INTERNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next monotonic internal challenge id, used as the scheduler's arrival-order
/// tiebreaker (§3, §4.1's ordering contract).
pub fn next_internal_id() -> u64 {
    NEXT_INTERNAL_ID.fetch_add(1, Ordering::Relaxed)
}

/// One (input, reference-output) pair.
///
/// The user's output for this testdata isn't tracked here: Execute writes it into the
/// challenge's scratch `Box` under a deterministic name (`"{id}-stdout"`), and Scoring looks it
/// up by that same name and deletes it when done (the invariant in §3). Addressing it by name
/// rather than by a field on this struct avoids needing interior mutability on `testdatas` just
/// to pass one path between two tasks.
#[derive(Debug, Clone)]
pub struct TestData {
    pub id: u32,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub subtasks: HashSet<u32>,
}

impl TestData {
    pub fn new(id: u32, input_path: PathBuf, output_path: PathBuf) -> Self {
        TestData {
            id,
            input_path,
            output_path,
            subtasks: HashSet::new(),
        }
    }

    /// The box filename Execute stores this testdata's captured stdout under.
    pub fn useroutput_name(&self) -> String {
        format!("{}-stdout", self.id)
    }
}

/// A weighted group of testdatas with optional dependencies on other subtasks.
#[derive(Debug, Clone)]
pub struct Subtask {
    pub id: u32,
    pub score: Decimal,
    pub testdata_ids: Vec<u32>,
    pub dependency_subtasks: Vec<u32>,
}

/// Per-challenge report callback: `(task name, payload)`. The payload is already-serialized JSON
/// so the scheduler and task code never depend on the transport crate.
pub type Reporter = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Root entity for one submission, owned exclusively by the scheduler for its lifetime.
///
/// `skip_subtasks` is written by Execute/Scoring's `finish` and read by Execute/Scoring's `setup`
/// on other worker threads, so it's guarded by a mutex (§5's shared-resource policy). Same for
/// `result`, which every task phase reads and mutates.
pub struct Challenge {
    pub chal_id: u64,
    pub pro_id: u64,
    pub contest_id: u64,
    pub acct_id: u64,
    pub priority: i64,
    pub internal_id: u64,

    pub code_path: PathBuf,
    pub res_path: PathBuf,
    /// Directory holding the bundled DIFF/DIFF_STRICT/DIFF_FLOAT* checker binaries
    /// (`JUDGE_CHECKER_DIR`, §4.4).
    pub default_checker_dir: PathBuf,
    pub limits: Limits,

    pub skip_nonac: bool,
    pub skip_subtasks: Mutex<HashSet<u32>>,

    pub testdatas: HashMap<u32, TestData>,
    pub subtasks: HashMap<u32, Subtask>,

    pub result: Mutex<ChallengeResult>,
    pub reporter: Reporter,
    /// Guards against sending more than one summary report (§8 "exactly one summary report is
    /// eventually emitted"): both `SummaryTask::finish` and the scheduler's uncaught-failure path
    /// (§4.1) race to call [`Challenge::send_summary_once`].
    summary_sent: AtomicBool,

    pub sandbox_box: ChallengeBox,
    pub problem_context: Arc<dyn ProblemContext>,

    /// Opportunistic `output.zip` of every produced user-output file (§C.1 of SPEC_FULL.md).
    /// `None` unless the caller opts in via [`Challenge::with_archive`] (default off).
    pub archive: Option<Arc<OutputArchive>>,

    /// Cpuset strings (`JUDGE_CPUSET`, SPEC_FULL.md §B.3) round-robin assigned to Execute tasks
    /// (§4.3). Empty means no cpuset pinning.
    cpuset: Vec<String>,
    next_cpuset: AtomicUsize,
}

impl Challenge {
    /// Construct a challenge from its already-resolved fields. `result` should already carry one
    /// `TestDataResult`/`SubtaskResult` entry per testdata/subtask (with a `None` status) — the
    /// builder that parses the submission message is responsible for seeding it, since only it
    /// knows the full testdata/subtask id set up front.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chal_id: u64,
        pro_id: u64,
        contest_id: u64,
        acct_id: u64,
        priority: i64,
        code_path: PathBuf,
        res_path: PathBuf,
        default_checker_dir: PathBuf,
        limits: Limits,
        skip_nonac: bool,
        skip_subtasks: HashSet<u32>,
        testdatas: HashMap<u32, TestData>,
        subtasks: HashMap<u32, Subtask>,
        result: ChallengeResult,
        reporter: Reporter,
        sandbox_box: ChallengeBox,
        problem_context: Arc<dyn ProblemContext>,
    ) -> Self {
        Challenge {
            chal_id,
            pro_id,
            contest_id,
            acct_id,
            priority,
            internal_id: next_internal_id(),
            code_path,
            res_path,
            default_checker_dir,
            limits,
            skip_nonac,
            skip_subtasks: Mutex::new(skip_subtasks),
            testdatas,
            subtasks,
            result: Mutex::new(result),
            reporter,
            summary_sent: AtomicBool::new(false),
            sandbox_box,
            problem_context,
            archive: None,
            cpuset: Vec::new(),
            next_cpuset: AtomicUsize::new(0),
        }
    }

    /// Opt this challenge into cpuset pinning (SPEC_FULL.md §B.3). Consumes and returns `self` so
    /// it composes with construction, same as [`Challenge::with_archive`].
    pub fn with_cpuset(mut self, cpuset: Vec<String>) -> Self {
        self.cpuset = cpuset;
        self
    }

    /// Round-robin the next cpuset string for an Execute task to pin to (§4.3), or `None` if no
    /// cpuset list was configured.
    pub fn next_cpuset(&self) -> Option<String> {
        if self.cpuset.is_empty() {
            return None;
        }
        let i = self.next_cpuset.fetch_add(1, Ordering::Relaxed) % self.cpuset.len();
        Some(self.cpuset[i].clone())
    }

    /// Opt this challenge into the output archive (§C.1 of SPEC_FULL.md). Consumes and returns
    /// `self` so it composes with construction: `Challenge::new(...).with_archive(archive)`.
    pub fn with_archive(mut self, archive: Arc<OutputArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Emit the final summary report, but only the first time this is called for this challenge.
    pub fn send_summary_once(&self) {
        if self
            .summary_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let result = self.result.lock().unwrap();
            (self.reporter)(serde_json::json!({
                "chal_id": self.chal_id,
                "task": "summary",
                "result": result.clone(),
            }));
        }
    }

    /// Merge testdata-ids' subtasks into `skip_subtasks`. `skip_subtasks` only ever grows (the
    /// monotonic-skip invariant of §3/§8).
    pub fn mark_subtasks_skipped<I: IntoIterator<Item = u32>>(&self, subtask_ids: I) {
        let mut skip = self.skip_subtasks.lock().unwrap();
        skip.extend(subtask_ids);
    }

    /// Whether every subtask this set of ids belongs to is already known to be doomed.
    pub fn all_subtasks_already_skipped(&self, subtask_ids: &HashSet<u32>) -> bool {
        let skip = self.skip_subtasks.lock().unwrap();
        subtask_ids.iter().all(|s| skip.contains(s))
    }

    /// The current overall status, if one has been decided yet.
    pub fn total_status(&self) -> Option<Status> {
        self.result.lock().unwrap().total_result.status
    }
}
