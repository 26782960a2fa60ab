use serde::Serialize;
use std::collections::HashMap;

/// Aggregate progress bucket for one student, derived from task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    Completed,
    OnTrack,
    Late,
    NotStarted,
}

/// One (task stage, task status) observation together with the student's own
/// current stage. Status strings come straight from the `tasks` table.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub student_stage: i64,
    pub task_stage: i64,
    pub status: String,
}

/// Advances the running bucket with one task observation.
///
/// Priority: `Late` dominates everything once set; `OnTrack` dominates
/// `NotStarted`; `Completed` survives only while no task contradicts it.
/// Status strings other than "completed"/"locked" are treated as active work.
pub fn step_bucket(current: Bucket, snap: &TaskSnapshot) -> Bucket {
    if snap.status == "completed" {
        return current;
    }
    if snap.student_stage > snap.task_stage {
        return Bucket::Late;
    }
    if snap.student_stage == snap.task_stage && snap.status != "locked" {
        if current != Bucket::Late {
            return Bucket::OnTrack;
        }
        return current;
    }
    // student_stage < task_stage, or the task is still locked
    if current != Bucket::Late && current != Bucket::OnTrack {
        return Bucket::NotStarted;
    }
    current
}

/// Folds a student's task observations into a final bucket.
///
/// A student with zero observations comes out `Completed`. That is the
/// fold-initialization default the product currently relies on; the
/// completed-TG counter is stricter and requires at least one task.
#[allow(dead_code)]
pub fn fold_bucket<'a, I>(snaps: I) -> Bucket
where
    I: IntoIterator<Item = &'a TaskSnapshot>,
{
    snaps.into_iter().fold(Bucket::Completed, |acc, s| step_bucket(acc, s))
}

/// Groups (student email, observation) tuples and folds each student
/// independently. Tuple order only matters through `Late` dominance, which
/// is itself order-independent.
pub fn aggregate_buckets<I>(rows: I) -> HashMap<String, Bucket>
where
    I: IntoIterator<Item = (String, TaskSnapshot)>,
{
    let mut by_student: HashMap<String, Bucket> = HashMap::new();
    for (email, snap) in rows {
        let current = by_student.get(&email).copied().unwrap_or(Bucket::Completed);
        by_student.insert(email, step_bucket(current, &snap));
    }
    by_student
}

/// Four named counters, zero-initialized so charts always render four bars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub completed: i64,
    pub on_track: i64,
    pub late: i64,
    pub not_started: i64,
}

impl Distribution {
    pub fn record(&mut self, bucket: Bucket) {
        match bucket {
            Bucket::Completed => self.completed += 1,
            Bucket::OnTrack => self.on_track += 1,
            Bucket::Late => self.late += 1,
            Bucket::NotStarted => self.not_started += 1,
        }
    }

    pub fn from_buckets<I>(buckets: I) -> Self
    where
        I: IntoIterator<Item = Bucket>,
    {
        let mut dist = Self::default();
        for b in buckets {
            dist.record(b);
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(student_stage: i64, task_stage: i64, status: &str) -> TaskSnapshot {
        TaskSnapshot {
            student_stage,
            task_stage,
            status: status.to_string(),
        }
    }

    #[test]
    fn zero_tasks_defaults_to_completed() {
        assert_eq!(fold_bucket(&[]), Bucket::Completed);
    }

    #[test]
    fn all_completed_stays_completed() {
        let snaps = vec![snap(2, 1, "completed"), snap(2, 2, "completed")];
        assert_eq!(fold_bucket(&snaps), Bucket::Completed);
    }

    #[test]
    fn active_task_at_own_stage_is_on_track() {
        let snaps = vec![snap(1, 1, "completed"), snap(1, 1, "in_progress")];
        assert_eq!(fold_bucket(&snaps), Bucket::OnTrack);
    }

    #[test]
    fn unfinished_task_behind_student_stage_is_late() {
        let snaps = vec![snap(2, 1, "in_progress")];
        assert_eq!(fold_bucket(&snaps), Bucket::Late);
    }

    #[test]
    fn locked_future_tasks_mean_not_started() {
        let snaps = vec![snap(1, 1, "locked"), snap(1, 2, "locked")];
        assert_eq!(fold_bucket(&snaps), Bucket::NotStarted);
    }

    #[test]
    fn on_track_beats_not_started_but_not_late() {
        let snaps = vec![snap(1, 2, "locked"), snap(1, 1, "in_progress")];
        assert_eq!(fold_bucket(&snaps), Bucket::OnTrack);

        let snaps = vec![snap(2, 2, "in_progress"), snap(2, 1, "in_progress")];
        assert_eq!(fold_bucket(&snaps), Bucket::Late);
    }

    #[test]
    fn unknown_status_counts_as_active_work() {
        // Malformed statuses are neither completed nor locked.
        let snaps = vec![snap(1, 1, "???")];
        assert_eq!(fold_bucket(&snaps), Bucket::OnTrack);
        let snaps = vec![snap(2, 1, "???")];
        assert_eq!(fold_bucket(&snaps), Bucket::Late);
    }

    #[test]
    fn late_dominates_under_every_tuple_permutation() {
        let base = [
            snap(2, 1, "in_progress"), // the Late trigger
            snap(2, 2, "completed"),
            snap(2, 2, "in_progress"),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let perm: Vec<TaskSnapshot> = order.iter().map(|&i| base[i].clone()).collect();
            assert_eq!(fold_bucket(&perm), Bucket::Late, "order {:?}", order);
        }
    }

    #[test]
    fn aggregate_groups_students_independently() {
        let rows = vec![
            ("a@x".to_string(), snap(1, 1, "in_progress")),
            ("b@x".to_string(), snap(2, 1, "in_progress")),
            ("a@x".to_string(), snap(1, 2, "locked")),
            ("c@x".to_string(), snap(1, 1, "completed")),
        ];
        let buckets = aggregate_buckets(rows);
        assert_eq!(buckets.get("a@x"), Some(&Bucket::OnTrack));
        assert_eq!(buckets.get("b@x"), Some(&Bucket::Late));
        assert_eq!(buckets.get("c@x"), Some(&Bucket::Completed));
    }

    #[test]
    fn distribution_is_zero_filled() {
        let empty = Distribution::default();
        assert_eq!(
            serde_json::to_value(empty).unwrap(),
            serde_json::json!({
                "completed": 0,
                "onTrack": 0,
                "late": 0,
                "notStarted": 0
            })
        );

        let dist = Distribution::from_buckets([Bucket::Late, Bucket::Late, Bucket::OnTrack]);
        assert_eq!(dist.late, 2);
        assert_eq!(dist.on_track, 1);
        assert_eq!(dist.completed, 0);
        assert_eq!(dist.not_started, 0);
    }
}
