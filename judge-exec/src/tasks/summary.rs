//! Summary: the single terminal DAG node that aggregates per-testdata results into per-subtask
//! and overall verdicts (§4.5).

use rust_decimal::Decimal;

use judge_dag::{MessageType, Status, SummaryType};

use crate::challenge::Challenge;
use crate::task_entry::{Task, TaskEntry};

pub struct SummaryTask;

impl Task for SummaryTask {
    fn setup(&self, _chal: &Challenge, _entry: &TaskEntry) -> bool {
        true
    }

    fn run(&self, chal: &Challenge, _entry: &TaskEntry) {
        let mut result = chal.result.lock().unwrap();

        // Any testdata a prior CE/CLE/JE never got to run is still null; it ends Skipped.
        for testdata_result in result.testdata_results.values_mut() {
            if testdata_result.status.is_none() {
                testdata_result.status = Some(Status::Skipped);
            }
        }

        let mut subtask_ids: Vec<u32> = chal.subtasks.keys().copied().collect();
        subtask_ids.sort_unstable();

        // Pass 1: aggregate each subtask from its own testdata, ignoring dependencies.
        for &sid in &subtask_ids {
            let subtask = &chal.subtasks[&sid];

            if subtask.testdata_ids.is_empty() {
                let sr = result.subtask_results.entry(sid).or_default();
                if sr.status.is_none() {
                    sr.status = Some(Status::JudgeError);
                }
                continue;
            }

            let mut memory = 0u64;
            let mut time = 0u64;
            let mut worst: Option<Status> = None;
            for &tid in &subtask.testdata_ids {
                let Some(testdata_result) = result.testdata_results.get(&tid) else {
                    continue;
                };
                if testdata_result.status == Some(Status::Skipped) {
                    continue;
                }
                memory += testdata_result.memory;
                time = time.max(testdata_result.time);
                // every status is `Some` by now: the loop above already collapsed null ones to
                // `Skipped`, and `Skipped` entries were just filtered out.
                let status = testdata_result.status.unwrap();
                worst = Some(worst.map_or(status, |w| w.max(status)));
            }

            let min_fractional_score = subtask
                .testdata_ids
                .iter()
                .filter_map(|tid| result.testdata_results.get(tid))
                .filter(|tr| tr.status != Some(Status::Skipped))
                .map(|tr| tr.score)
                .min();

            let sr = result.subtask_results.entry(sid).or_default();
            sr.memory = memory;
            sr.time = time;
            sr.status = worst;
            sr.score = match worst {
                Some(status) if status.is_passing() => {
                    if chal.problem_context.checker_type().awards_fractional_credit() {
                        let min_score = min_fractional_score.unwrap_or(Decimal::ZERO);
                        match chal.problem_context.summary_type() {
                            SummaryType::GroupMin => subtask.score * min_score,
                            SummaryType::Overwrite => min_score,
                            SummaryType::Custom => Decimal::ZERO,
                        }
                    } else {
                        subtask.score
                    }
                }
                _ => Decimal::ZERO,
            };
        }

        // Pass 2: a subtask whose dependency didn't pass is forced Skipped, regardless of its own
        // testdata outcomes. A dependency that is itself forced Skipped here must cascade to
        // whatever depends on it in turn, so this re-reads the live map each round and repeats to a
        // fixed point instead of working off a single snapshot; that makes the result independent of
        // the order subtask ids happen to be in, including chains more than one hop deep.
        loop {
            let mut changed = false;
            for &sid in &subtask_ids {
                let subtask = &chal.subtasks[&sid];
                let dependency_failed = subtask.dependency_subtasks.iter().any(|dep| {
                    !matches!(
                        result.subtask_results.get(dep).and_then(|sr| sr.status),
                        Some(Status::Accepted) | Some(Status::PartialCorrect)
                    )
                });
                if dependency_failed {
                    let sr = result.subtask_results.get_mut(&sid).unwrap();
                    if sr.status != Some(Status::Skipped) {
                        sr.status = Some(Status::Skipped);
                        sr.score = Decimal::ZERO;
                        sr.time = 0;
                        sr.memory = 0;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // A subtask can only still be null here under a pre-existing CE/CLE/JE (no testdata ever
        // ran to decide one).
        for sr in result.subtask_results.values_mut() {
            if sr.status.is_none() {
                sr.status = Some(Status::Skipped);
            }
        }

        if result.total_result.status.is_none() {
            let mut memory = 0u64;
            let mut time = 0u64;
            let mut score = Decimal::ZERO;
            let mut worst: Option<Status> = None;
            for sr in result.subtask_results.values() {
                if sr.status == Some(Status::Skipped) {
                    continue;
                }
                memory += sr.memory;
                time = time.max(sr.time);
                score += sr.score;
                worst = Some(match worst {
                    None => sr.status.unwrap(),
                    Some(w) => w.max(sr.status.unwrap()),
                });
            }
            result.total_result.memory = memory;
            result.total_result.time = time;
            result.total_result.score = score;
            result.total_result.status = worst;
            if result.total_result.status.is_none() {
                result.total_result.status = Some(Status::JudgeError);
                result.total_result.ie_message =
                    "Problem do not have any testdata or subtask".to_string();
                result.total_result.message_type = MessageType::Text;
            }
        }
    }

    fn finish(&self, chal: &Challenge, _entry: &TaskEntry) {
        chal.send_summary_once();
        if let Some(archive) = &chal.archive {
            if let Err(e) = archive.finish() {
                log::warn!("failed to finalize output archive for challenge {}: {e}", chal.chal_id);
            }
        }
        if let Err(e) = chal.sandbox_box.cleanup() {
            log::warn!("failed to clean up scratch box for challenge {}: {e}", chal.chal_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use judge_dag::{ChallengeResult, CheckerType, Compiler, Limits, SubtaskResult, SummaryType, TestDataResult};
    use judge_store::ChallengeBox;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::challenge::{Subtask, TestData};
    use crate::problem::batch::{BatchConfig, BatchProblemContext};

    fn make_challenge(
        subtasks: Vec<Subtask>,
        testdata_statuses: Vec<(u32, Option<Status>, Decimal)>,
    ) -> (Challenge, Arc<Mutex<Vec<serde_json::Value>>>) {
        make_challenge_with(subtasks, testdata_statuses, CheckerType::Diff, SummaryType::GroupMin)
    }

    fn make_challenge_with(
        subtasks: Vec<Subtask>,
        testdata_statuses: Vec<(u32, Option<Status>, Decimal)>,
        checker_type: CheckerType,
        summary_type: SummaryType,
    ) -> (Challenge, Arc<Mutex<Vec<serde_json::Value>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let reports_clone = reports.clone();

        let mut result = ChallengeResult::new(1);
        let mut testdatas = HashMap::new();
        for (id, status, score) in testdata_statuses {
            let mut tr = TestDataResult::new(id);
            tr.status = status;
            tr.score = score;
            result.testdata_results.insert(id, tr);
            testdatas.insert(id, TestData::new(id, PathBuf::new(), PathBuf::new()));
        }
        for subtask in &subtasks {
            result.subtask_results.insert(subtask.id, SubtaskResult::default());
        }
        let subtask_map: HashMap<u32, Subtask> =
            subtasks.into_iter().map(|s| (s.id, s)).collect();

        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 1).unwrap();

        let checker_compiler = checker_type.needs_build().then_some(Compiler::GccCpp17);
        let problem_context = Arc::new(BatchProblemContext::new(BatchConfig {
            userprog_compiler: Compiler::GccCpp17,
            userprog_compile_args: vec![],
            has_grader: false,
            checker_type,
            checker_compiler,
            checker_compile_args: vec![],
            summary_type,
            summary_compiler: None,
            summary_compile_args: vec![],
        }));

        let chal = Challenge::new(
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
            testdatas,
            subtask_map,
            result,
            Box::new(move |v| reports_clone.lock().unwrap().push(v)),
            chal_box,
            problem_context,
        );
        (chal, reports)
    }

    fn subtask(id: u32, score: Decimal, testdata_ids: Vec<u32>, deps: Vec<u32>) -> Subtask {
        Subtask {
            id,
            score,
            testdata_ids,
            dependency_subtasks: deps,
        }
    }

    #[test]
    fn all_accept_sums_weighted_scores() {
        let (chal, reports) = make_challenge(
            vec![
                subtask(1, Decimal::new(20, 0), vec![1], vec![]),
                subtask(2, Decimal::new(30, 0), vec![2], vec![]),
                subtask(3, Decimal::new(50, 0), vec![3], vec![]),
            ],
            vec![
                (1, Some(Status::Accepted), Decimal::ZERO),
                (2, Some(Status::Accepted), Decimal::ZERO),
                (3, Some(Status::Accepted), Decimal::ZERO),
            ],
        );

        SummaryTask.run(&chal, &dummy_entry());
        SummaryTask.finish(&chal, &dummy_entry());

        let result = chal.result.lock().unwrap();
        assert_eq!(result.total_result.status, Some(Status::Accepted));
        assert_eq!(result.total_result.score, Decimal::new(100, 0));
        assert_eq!(reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn dependency_failure_skips_dependent_subtask() {
        let (chal, _reports) = make_challenge(
            vec![
                subtask(1, Decimal::new(40, 0), vec![1], vec![]),
                subtask(2, Decimal::new(60, 0), vec![2], vec![1]),
            ],
            vec![
                (1, Some(Status::WrongAnswer), Decimal::ZERO),
                (2, Some(Status::Accepted), Decimal::ZERO),
            ],
        );

        SummaryTask.run(&chal, &dummy_entry());

        let result = chal.result.lock().unwrap();
        assert_eq!(result.subtask_results[&2].status, Some(Status::Skipped));
        assert_eq!(result.subtask_results[&2].score, Decimal::ZERO);
    }

    #[test]
    fn dependency_failure_cascades_through_a_multi_hop_chain() {
        let (chal, _reports) = make_challenge(
            vec![
                subtask(1, Decimal::new(20, 0), vec![1], vec![]),
                subtask(2, Decimal::new(30, 0), vec![2], vec![1]),
                subtask(3, Decimal::new(50, 0), vec![3], vec![2]),
            ],
            vec![
                (1, Some(Status::WrongAnswer), Decimal::ZERO),
                (2, Some(Status::Accepted), Decimal::ZERO),
                (3, Some(Status::Accepted), Decimal::ZERO),
            ],
        );

        SummaryTask.run(&chal, &dummy_entry());

        let result = chal.result.lock().unwrap();
        assert_eq!(result.subtask_results[&2].status, Some(Status::Skipped));
        assert_eq!(result.subtask_results[&3].status, Some(Status::Skipped));
        assert_eq!(result.subtask_results[&3].score, Decimal::ZERO);
    }

    #[test]
    fn groupmin_scores_by_minimum_fractional_testdata_score() {
        let (chal, _reports) = make_challenge_with(
            vec![subtask(1, Decimal::new(100, 0), vec![1, 2], vec![])],
            vec![
                (1, Some(Status::PartialCorrect), Decimal::new(37, 2)),
                (2, Some(Status::Accepted), Decimal::ONE),
            ],
            CheckerType::StdTestlib,
            SummaryType::GroupMin,
        );

        SummaryTask.run(&chal, &dummy_entry());

        let result = chal.result.lock().unwrap();
        assert_eq!(result.subtask_results[&1].status, Some(Status::PartialCorrect));
        assert_eq!(result.subtask_results[&1].score, Decimal::new(37, 0));
    }

    fn dummy_entry() -> TaskEntry {
        TaskEntry::new(Box::new(SummaryTask), 1, 0)
    }
}
