//! Status aggregation.
//!
//! `aggregate` is the only way a generation's status is derived. It is pure
//! and total: every combination of policy, clip signals and assembly outcome
//! maps to exactly one generation status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::clip::ClipStatus;
use crate::generation::{AssemblyOutcome, GenerationStatus};

/// How many failed clips a generation tolerates before it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AssemblyPolicy {
    /// Any failed clip fails the generation.
    #[default]
    FailFast,
    /// Assemble from the completed clips once every clip is terminal, as
    /// long as at least `min_clips` completed.
    Partial { min_clips: usize },
}

impl AssemblyPolicy {
    /// Partial assembly needing at least one completed clip.
    pub fn partial(min_clips: usize) -> Self {
        Self::Partial {
            min_clips: min_clips.max(1),
        }
    }

    pub fn allows_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// Whether `failed` out of `total` clips still leaves a video to assemble.
    pub fn tolerates(&self, failed: usize, total: usize) -> bool {
        match self {
            Self::FailFast => failed == 0,
            Self::Partial { min_clips } => {
                failed == 0 || total.saturating_sub(failed) >= (*min_clips).max(1)
            }
        }
    }
}

/// What the aggregator needs to know about one clip.
///
/// `submitted` stays true once a submission was attempted, so a clip sent
/// back to pending by a retry still counts as started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipSignal {
    pub status: ClipStatus,
    pub submitted: bool,
}

impl ClipSignal {
    pub fn new(status: ClipStatus, submitted: bool) -> Self {
        Self { status, submitted }
    }
}

impl From<ClipStatus> for ClipSignal {
    /// Signal for a clip with no retry history.
    fn from(status: ClipStatus) -> Self {
        Self {
            status,
            submitted: status != ClipStatus::Pending,
        }
    }
}

/// Derive the generation status under the fail-fast policy.
///
/// Rules, first match wins:
/// 1. any clip failed -> failed
/// 2. assembly failed -> failed
/// 3. assembly succeeded -> completed
/// 4. all clips completed -> assembling
/// 5. no clip submitted yet -> pending
/// 6. otherwise -> generating
pub fn aggregate(clips: &[ClipSignal], assembly: &AssemblyOutcome) -> GenerationStatus {
    aggregate_with(AssemblyPolicy::FailFast, clips, assembly)
}

/// Derive the generation status from its clips and assembly outcome.
///
/// Same rules as [`aggregate`], with rule 1 reading "more clips failed than
/// the policy tolerates" and rule 4 "every clip terminal and at least one
/// completed".
pub fn aggregate_with(
    policy: AssemblyPolicy,
    clips: &[ClipSignal],
    assembly: &AssemblyOutcome,
) -> GenerationStatus {
    let failed = clips.iter().filter(|c| c.status == ClipStatus::Failed).count();
    if !policy.tolerates(failed, clips.len()) {
        return GenerationStatus::Failed;
    }
    match assembly {
        AssemblyOutcome::Failed { .. } => return GenerationStatus::Failed,
        AssemblyOutcome::Succeeded { .. } => return GenerationStatus::Completed,
        AssemblyOutcome::NotAttempted | AssemblyOutcome::InProgress { .. } => {}
    }
    let completed = clips.iter().filter(|c| c.status == ClipStatus::Completed).count();
    if completed > 0 && completed + failed == clips.len() {
        return GenerationStatus::Assembling;
    }
    if clips.iter().all(|c| !c.submitted) {
        return GenerationStatus::Pending;
    }
    GenerationStatus::Generating
}

/// Whether the assembly step should be started now.
pub fn needs_assembly(
    policy: AssemblyPolicy,
    clips: &[ClipSignal],
    assembly: &AssemblyOutcome,
) -> bool {
    matches!(assembly, AssemblyOutcome::NotAttempted)
        && aggregate_with(policy, clips, assembly) == GenerationStatus::Assembling
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn outcomes() -> Vec<AssemblyOutcome> {
        vec![
            AssemblyOutcome::NotAttempted,
            AssemblyOutcome::InProgress {
                started_at: Utc::now(),
            },
            AssemblyOutcome::Succeeded {
                artifact_path: "/out/final.mp4".into(),
            },
            AssemblyOutcome::Failed {
                reason: "concat failed".into(),
            },
        ]
    }

    fn signals(statuses: &[ClipStatus]) -> Vec<ClipSignal> {
        statuses.iter().copied().map(ClipSignal::from).collect()
    }

    /// Independent restatement of the rule table used as the oracle.
    fn expected(clips: &[ClipSignal], assembly: &AssemblyOutcome) -> GenerationStatus {
        let count = |s: ClipStatus| clips.iter().filter(|c| c.status == s).count();
        if count(ClipStatus::Failed) > 0 {
            GenerationStatus::Failed
        } else if matches!(assembly, AssemblyOutcome::Failed { .. }) {
            GenerationStatus::Failed
        } else if matches!(assembly, AssemblyOutcome::Succeeded { .. }) {
            GenerationStatus::Completed
        } else if !clips.is_empty() && count(ClipStatus::Completed) == clips.len() {
            GenerationStatus::Assembling
        } else if clips.iter().filter(|c| c.submitted).count() == 0 {
            GenerationStatus::Pending
        } else {
            GenerationStatus::Generating
        }
    }

    #[test]
    fn test_rule_table_examples() {
        use ClipStatus::*;
        let none = AssemblyOutcome::NotAttempted;
        let aggregate = |clips: &[ClipStatus], assembly: &AssemblyOutcome| {
            aggregate(&signals(clips), assembly)
        };

        assert_eq!(aggregate(&[Pending; 12], &none), GenerationStatus::Pending);
        assert_eq!(
            aggregate(&[Pending, Generating, Completed], &none),
            GenerationStatus::Generating
        );
        assert_eq!(aggregate(&[Completed; 12], &none), GenerationStatus::Assembling);
        assert_eq!(
            aggregate(&[Completed, Failed, Generating], &none),
            GenerationStatus::Failed
        );
        assert_eq!(
            aggregate(
                &[Completed; 3],
                &AssemblyOutcome::Succeeded {
                    artifact_path: "x".into()
                }
            ),
            GenerationStatus::Completed
        );
        assert_eq!(
            aggregate(
                &[Completed; 3],
                &AssemblyOutcome::Failed { reason: "x".into() }
            ),
            GenerationStatus::Failed
        );
    }

    /// Pending clips either never submitted or waiting on a retry.
    const KINDS: [ClipSignal; 5] = [
        ClipSignal { status: ClipStatus::Pending, submitted: false },
        ClipSignal { status: ClipStatus::Pending, submitted: true },
        ClipSignal { status: ClipStatus::Generating, submitted: true },
        ClipSignal { status: ClipStatus::Completed, submitted: true },
        ClipSignal { status: ClipStatus::Failed, submitted: true },
    ];

    #[test]
    fn test_exhaustive_small_vectors() {
        for len in 1..=4u32 {
            let total = KINDS.len().pow(len);
            for code in 0..total {
                let mut n = code;
                let clips: Vec<ClipSignal> = (0..len)
                    .map(|_| {
                        let s = KINDS[n % KINDS.len()];
                        n /= KINDS.len();
                        s
                    })
                    .collect();
                for outcome in outcomes() {
                    assert_eq!(
                        aggregate(&clips, &outcome),
                        expected(&clips, &outcome),
                        "clips={clips:?} assembly={outcome:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_random_twelve_clip_vectors() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let outcomes = outcomes();
        for _ in 0..5_000 {
            // Bias toward completed so the assembling branch is well covered.
            let clips: Vec<ClipSignal> = (0..12)
                .map(|_| {
                    if rng.random_bool(0.6) {
                        ClipStatus::Completed.into()
                    } else {
                        KINDS[rng.random_range(0..KINDS.len())]
                    }
                })
                .collect();
            let outcome = &outcomes[rng.random_range(0..outcomes.len())];
            assert_eq!(aggregate(&clips, outcome), expected(&clips, outcome));
        }
    }

    #[test]
    fn test_retry_waiting_clips_stay_generating() {
        let none = AssemblyOutcome::NotAttempted;
        let waiting = ClipSignal::new(ClipStatus::Pending, true);
        let fresh = ClipSignal::from(ClipStatus::Pending);

        assert_eq!(aggregate(&[waiting, waiting], &none), GenerationStatus::Generating);
        assert_eq!(aggregate(&[waiting, fresh], &none), GenerationStatus::Generating);
        assert_eq!(aggregate(&[fresh, fresh], &none), GenerationStatus::Pending);
    }

    #[test]
    fn test_needs_assembly_only_once() {
        let policy = AssemblyPolicy::FailFast;
        let clips = signals(&[ClipStatus::Completed; 4]);
        assert!(needs_assembly(policy, &clips, &AssemblyOutcome::NotAttempted));
        assert!(!needs_assembly(
            policy,
            &clips,
            &AssemblyOutcome::InProgress {
                started_at: Utc::now()
            }
        ));
        assert!(!needs_assembly(
            policy,
            &signals(&[ClipStatus::Completed, ClipStatus::Generating]),
            &AssemblyOutcome::NotAttempted
        ));
    }

    #[test]
    fn test_partial_policy_assembles_survivors() {
        use ClipStatus::*;
        let policy = AssemblyPolicy::partial(2);
        let none = AssemblyOutcome::NotAttempted;
        let status = |clips: &[ClipStatus]| aggregate_with(policy, &signals(clips), &none);

        assert_eq!(status(&[Completed, Failed, Generating]), GenerationStatus::Generating);
        assert_eq!(status(&[Completed, Failed, Completed]), GenerationStatus::Assembling);
        assert_eq!(status(&[Completed, Failed, Failed]), GenerationStatus::Failed);
        assert_eq!(status(&[Failed, Pending, Pending]), GenerationStatus::Generating);
        assert!(needs_assembly(
            policy,
            &signals(&[Completed, Failed, Completed]),
            &none
        ));
        assert_eq!(
            aggregate_with(
                policy,
                &signals(&[Completed, Failed, Completed]),
                &AssemblyOutcome::Succeeded {
                    artifact_path: "x".into()
                }
            ),
            GenerationStatus::Completed
        );
    }

    #[test]
    fn test_partial_policy_without_failures_matches_fail_fast() {
        let policy = AssemblyPolicy::partial(3);
        for len in 1..=3u32 {
            for code in 0..KINDS.len().pow(len) {
                let mut n = code;
                let clips: Vec<ClipSignal> = (0..len)
                    .map(|_| {
                        let s = KINDS[n % KINDS.len()];
                        n /= KINDS.len();
                        s
                    })
                    .filter(|c| c.status != ClipStatus::Failed)
                    .collect();
                for outcome in outcomes() {
                    assert_eq!(
                        aggregate_with(policy, &clips, &outcome),
                        aggregate(&clips, &outcome),
                        "clips={clips:?} assembly={outcome:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_partial_min_clips_is_at_least_one() {
        assert_eq!(AssemblyPolicy::partial(0), AssemblyPolicy::Partial { min_clips: 1 });
        assert!(!AssemblyPolicy::partial(0).tolerates(2, 2));
        assert!(AssemblyPolicy::partial(0).tolerates(1, 2));
        assert!(!AssemblyPolicy::FailFast.tolerates(1, 12));
    }
}
