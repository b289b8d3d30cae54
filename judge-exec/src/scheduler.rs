//! The Scheduler (§4.1): the priority-fair, bounded-concurrency runtime that drains the task
//! graphs of every in-flight challenge.
//!
//! Three kinds of thread cooperate, matching §5's "Suspension points" / "Ordering guarantees":
//! a fixed-size worker pool that actually runs `setup -> run -> finish`, one dispatcher thread
//! that moves runnable tasks onto free workers without exceeding `max_concurrent`, and one
//! completion thread that retires finished tasks and releases their successors. The two threads
//! and the worker pool coordinate through a priority queue (`runnable`), a running counter, and a
//! condvar-backed wake signal — deliberately not a single big lock held across a sandbox run.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::challenge::Challenge;
use crate::task_entry::TaskEntry;

/// Sort key for the runnable queue (§3 "Task entry"): priority ascending, then owning-challenge
/// id ascending, then `order` ascending, with `task_id` as a final deterministic tiebreaker for
/// entries that are otherwise indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunKey {
    priority: i64,
    internal_id: u64,
    order: u32,
    task_id: u64,
}

impl From<&TaskEntry> for RunKey {
    fn from(e: &TaskEntry) -> Self {
        RunKey {
            priority: e.priority,
            internal_id: e.internal_id,
            order: e.order,
            task_id: e.task_id,
        }
    }
}

impl Ord for RunKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.internal_id.cmp(&other.internal_id))
            .then(self.order.cmp(&other.order))
            .then(self.task_id.cmp(&other.task_id))
    }
}
impl PartialOrd for RunKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Wake signal that `runnable` has gained entries, or that a running slot has freed up. A plain
/// `Mutex<bool>` + `Condvar` rather than a channel: multiple producers only ever need to set one
/// flag and wake one waiter, never queue distinct messages.
#[derive(Default)]
struct WakeSignal {
    pulsed: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    fn pulse(&self) {
        *self.pulsed.lock().unwrap() = true;
        self.cond.notify_all();
    }

    /// Block until pulsed, then clear the flag and return.
    fn wait(&self) {
        let mut pulsed = self.pulsed.lock().unwrap();
        while !*pulsed {
            pulsed = self.cond.wait(pulsed).unwrap();
        }
        *pulsed = false;
    }
}

/// The scheduler's live state (§4.1 "State").
pub struct Scheduler {
    max_concurrent: usize,
    tasks: Mutex<HashMap<u64, TaskEntry>>,
    runnable: Mutex<BinaryHeap<Reverse<RunKey>>>,
    running: AtomicUsize,
    wake: WakeSignal,
    challenges: Mutex<HashMap<u64, Arc<Challenge>>>,
    stopped: AtomicBool,
    job_tx: Sender<TaskEntry>,
}

impl Scheduler {
    /// Build a scheduler with `max_concurrent` as the hard concurrency cap and spawn a worker
    /// pool of `pool_size` threads (§5: "the pool size does not itself cap concurrency"; a pool
    /// larger than `max_concurrent` is legal, it just means some workers stay idle).
    pub fn new(max_concurrent: usize, pool_size: usize) -> Arc<Self> {
        let (job_tx, job_rx) = bounded::<TaskEntry>(pool_size.max(1) * 4);

        let scheduler = Arc::new(Scheduler {
            max_concurrent,
            tasks: Mutex::new(HashMap::new()),
            runnable: Mutex::new(BinaryHeap::new()),
            running: AtomicUsize::new(0),
            wake: WakeSignal::default(),
            challenges: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            job_tx,
        });

        for i in 0..pool_size.max(1) {
            let scheduler = scheduler.clone();
            let job_rx = job_rx.clone();
            thread::Builder::new()
                .name(format!("judge-worker-{i}"))
                .spawn(move || scheduler.worker_loop(job_rx))
                .expect("failed to spawn judge worker thread");
        }
        {
            let scheduler = scheduler.clone();
            thread::Builder::new()
                .name("judge-dispatch".to_string())
                .spawn(move || scheduler.dispatch_loop())
                .expect("failed to spawn judge dispatch thread");
        }

        scheduler
    }

    /// Register a challenge and push its whole task DAG (§4.1 `push_dag`). `entries` must already
    /// be linked via [`crate::task_entry::link_task`] — this only inserts them and wakes the
    /// dispatcher.
    pub fn push_dag(&self, chal: Arc<Challenge>, entries: Vec<TaskEntry>) {
        log::info!(
            "challenge {} (internal {}): pushing {} tasks onto the scheduler",
            chal.chal_id,
            chal.internal_id,
            entries.len()
        );
        self.challenges.lock().unwrap().insert(chal.internal_id, chal);
        let mut tasks = self.tasks.lock().unwrap();
        let mut runnable = self.runnable.lock().unwrap();
        for entry in entries {
            self.add_task_locked(&mut tasks, &mut runnable, entry);
        }
        drop(runnable);
        drop(tasks);
        self.wake.pulse();
    }

    fn add_task_locked(
        &self,
        tasks: &mut HashMap<u64, TaskEntry>,
        runnable: &mut BinaryHeap<Reverse<RunKey>>,
        entry: TaskEntry,
    ) {
        if entry.indeg_cnt == 0 {
            runnable.push(Reverse(RunKey::from(&entry)));
        }
        tasks.insert(entry.task_id, entry);
    }

    /// Decrement the indegree of every successor of `finished_task_id`, releasing any that reach
    /// zero, then drop the finished entry (§4.1 `remove_task`).
    fn remove_task(&self, finished_task_id: u64) {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(entry) = tasks.remove(&finished_task_id) else {
            return;
        };
        let mut runnable = self.runnable.lock().unwrap();
        for successor_id in &entry.edges {
            if let Some(successor) = tasks.get_mut(successor_id) {
                successor.indeg_cnt = successor.indeg_cnt.saturating_sub(1);
                if successor.indeg_cnt == 0 {
                    runnable.push(Reverse(RunKey::from(&*successor)));
                }
            }
        }
    }

    /// Dispatcher thread (§4.1 "Dispatch loop"): while woken, submit runnable tasks to the worker
    /// pool until `max_concurrent` in-flight tasks are reached, then go back to sleep.
    fn dispatch_loop(self: Arc<Self>) {
        loop {
            self.wake.wait();
            if self.stopped.load(AtomicOrdering::SeqCst) {
                return;
            }
            loop {
                if self.running.load(AtomicOrdering::SeqCst) >= self.max_concurrent {
                    break;
                }
                let popped = self.runnable.lock().unwrap().pop();
                let Some(Reverse(key)) = popped else {
                    break;
                };
                let entry = {
                    let tasks = self.tasks.lock().unwrap();
                    tasks.get(&key.task_id).cloned()
                };
                let Some(entry) = entry else {
                    // Already retired by a racing completion; nothing to dispatch.
                    continue;
                };
                self.running.fetch_add(1, AtomicOrdering::SeqCst);
                if self.job_tx.send(entry).is_err() {
                    // Worker pool gone (shutdown); undo the accounting and stop dispatching.
                    self.running.fetch_sub(1, AtomicOrdering::SeqCst);
                    return;
                }
            }
        }
    }

    /// One worker thread of the pool: pull a job, run its three phases, report completion.
    fn worker_loop(self: Arc<Self>, job_rx: Receiver<TaskEntry>) {
        while let Ok(entry) = job_rx.recv() {
            let task_id = entry.task_id;
            let chal = self.challenges.lock().unwrap().get(&entry.internal_id).cloned();
            if let Some(chal) = chal {
                self.run_task(&chal, &entry);
            } else {
                log::warn!("task {task_id} has no registered challenge, dropping");
            }
            self.running.fetch_sub(1, AtomicOrdering::SeqCst);
            self.remove_task(task_id);
            self.wake.pulse();
        }
    }

    /// Run `setup -> run -> finish` for one task, catching panics the way §4.1's "Per-task
    /// worker" describes: any uncaught failure collapses the challenge to `InternalError`, sends
    /// a summary report (idempotently, via [`Challenge::send_summary_once`]), and the task is
    /// still considered finished either way.
    fn run_task(&self, chal: &Arc<Challenge>, entry: &TaskEntry) {
        let task = entry.task.clone();
        let chal_for_panic = chal.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if !task.setup(chal, entry) {
                return;
            }
            task.run(chal, entry);
            task.finish(chal, entry);
        }));

        if let Err(payload) = outcome {
            let message = panic_message(&payload);
            log::error!(
                "challenge {}: task {} failed: {message}",
                chal_for_panic.chal_id,
                entry.task_id
            );
            let ie_message = cfg!(debug_assertions).then(|| message.clone());
            chal_for_panic
                .result
                .lock()
                .unwrap()
                .collapse_to_internal_error(ie_message);
            chal_for_panic.send_summary_once();
        }
    }

    /// Signal shutdown: in-flight sandboxes are left to finish naturally (§5 "Cancellation"); no
    /// new task is dispatched afterwards.
    pub fn stop(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        self.wake.pulse();
    }

    /// Number of tasks currently in flight, for diagnostics/tests.
    pub fn running_count(&self) -> usize {
        self.running.load(AtomicOrdering::SeqCst)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use judge_dag::{ChallengeResult, CheckerType, Compiler, Limits, SummaryType};
    use judge_store::ChallengeBox;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::problem::batch::{BatchConfig, BatchProblemContext};
    use crate::task_entry::link_task;
    use crate::task_entry::Task;

    struct CountingTask(Arc<AtomicU32>);
    impl Task for CountingTask {
        fn setup(&self, _chal: &Challenge, _entry: &TaskEntry) -> bool {
            true
        }
        fn run(&self, _chal: &Challenge, _entry: &TaskEntry) {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn finish(&self, _chal: &Challenge, _entry: &TaskEntry) {}
    }

    struct PanicTask;
    impl Task for PanicTask {
        fn setup(&self, _chal: &Challenge, _entry: &TaskEntry) -> bool {
            true
        }
        fn run(&self, _chal: &Challenge, _entry: &TaskEntry) {
            panic!("boom");
        }
        fn finish(&self, _chal: &Challenge, _entry: &TaskEntry) {}
    }

    fn make_challenge() -> Arc<Challenge> {
        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 1).unwrap();
        let problem_context = Arc::new(BatchProblemContext::new(BatchConfig {
            userprog_compiler: Compiler::GccCpp17,
            userprog_compile_args: vec![],
            has_grader: false,
            checker_type: CheckerType::Diff,
            checker_compiler: None,
            checker_compile_args: vec![],
            summary_type: SummaryType::GroupMin,
            summary_compiler: None,
            summary_compile_args: vec![],
        }));
        Arc::new(Challenge::new(
            1,
            1,
            0,
            1,
            0,
            PathBuf::new(),
            PathBuf::new(),
            PathBuf::new(),
            Limits::default(),
            false,
            HashSet::new(),
            HashMap::new(),
            HashMap::new(),
            ChallengeResult::new(1),
            Box::new(|_| {}),
            chal_box,
            problem_context,
        ))
    }

    #[test]
    fn runs_a_linear_chain_in_order() {
        let scheduler = Scheduler::new(2, 2);
        let chal = make_challenge();
        let counter = Arc::new(AtomicU32::new(0));

        let mut a = TaskEntry::new(Box::new(CountingTask(counter.clone())), chal.internal_id, 0);
        let mut b = TaskEntry::new(Box::new(CountingTask(counter.clone())), chal.internal_id, 0);
        link_task(&mut a, &mut b);

        scheduler.push_dag(chal, vec![a, b]);

        for _ in 0..200 {
            if counter.load(AtomicOrdering::SeqCst) == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn panic_in_run_collapses_to_internal_error_and_reports_once() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let reports_clone = reports.clone();

        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 2).unwrap();
        let problem_context = Arc::new(BatchProblemContext::new(BatchConfig {
            userprog_compiler: Compiler::GccCpp17,
            userprog_compile_args: vec![],
            has_grader: false,
            checker_type: CheckerType::Diff,
            checker_compiler: None,
            checker_compile_args: vec![],
            summary_type: SummaryType::GroupMin,
            summary_compiler: None,
            summary_compile_args: vec![],
        }));
        let chal = Arc::new(Challenge::new(
            2,
            1,
            0,
            1,
            0,
            PathBuf::new(),
            PathBuf::new(),
            PathBuf::new(),
            Limits::default(),
            false,
            HashSet::new(),
            HashMap::new(),
            HashMap::new(),
            ChallengeResult::new(2),
            Box::new(move |v| reports_clone.lock().unwrap().push(v)),
            chal_box,
            problem_context,
        ));

        let scheduler = Scheduler::new(1, 1);
        let task = TaskEntry::new(Box::new(PanicTask), chal.internal_id, 0);
        scheduler.push_dag(chal.clone(), vec![task]);

        for _ in 0..200 {
            if chal.total_status().is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(chal.total_status(), Some(judge_dag::Status::InternalError));
        assert_eq!(reports.lock().unwrap().len(), 1);
    }
}
