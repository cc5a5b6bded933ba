//! Per-household enrichment scheduling, driven by the latest job snapshot.

pub mod runner;

use plan_client::domain::{JobStatus, PipelineJobSnapshot};
use time::{Duration, OffsetDateTime};

pub use runner::{EnrichmentRunner, EstimateSettings, RunBudget, RunError, RunOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePolicy {
    pub cadence_days: i64,
    pub max_running_minutes: i64,
    pub cooldown_minutes: i64,
    pub error_cooldown_minutes: i64,
    pub required_calc_version: String,
    pub enforce_cadence: bool,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            cadence_days: 30,
            max_running_minutes: 3,
            cooldown_minutes: 60,
            error_cooldown_minutes: 15,
            required_calc_version: crate::classify::PLAN_CALC_VERSION.to_string(),
            enforce_cadence: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartReason {
    NoPriorJob,
    StaleRunningJob,
    AlreadyRunning,
    CalcVersionMissing,
    CalcVersionChanged,
    RemainingWork,
    CooldownActive,
    PreviousRunFailed,
    CadenceNotEnforced,
    CalcWindowMissing,
    MonthlyCadenceNotElapsed,
    MonthlyCadenceElapsed,
}

impl StartReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPriorJob => "no_prior_job",
            Self::StaleRunningJob => "stale_running_job",
            Self::AlreadyRunning => "already_running",
            Self::CalcVersionMissing => "calc_version_missing",
            Self::CalcVersionChanged => "calc_version_changed",
            Self::RemainingWork => "remaining_work",
            Self::CooldownActive => "cooldown_active",
            Self::PreviousRunFailed => "previous_run_failed",
            Self::CadenceNotEnforced => "cadence_not_enforced",
            Self::CalcWindowMissing => "calc_window_missing",
            Self::MonthlyCadenceNotElapsed => "monthly_cadence_not_elapsed",
            Self::MonthlyCadenceElapsed => "monthly_cadence_elapsed",
        }
    }
}

impl std::fmt::Display for StartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDecision {
    pub ok_to_start: bool,
    pub reason: StartReason,
}

impl StartDecision {
    fn start(reason: StartReason) -> Self {
        Self {
            ok_to_start: true,
            reason,
        }
    }

    fn skip(reason: StartReason) -> Self {
        Self {
            ok_to_start: false,
            reason,
        }
    }
}

/// Decide whether a new enrichment run may start for a household.
///
/// Checks, in order: in-flight runs (a RUNNING snapshot older than
/// `max_running_minutes` counts as crashed), calc version drift, unfinished
/// work from a bounded run (bypasses cooldown), the cooldown window, a failed
/// previous run, then the cadence measured from `last_calc_window_end`.
pub fn should_start(latest: Option<&PipelineJobSnapshot>, now: OffsetDateTime, policy: &SchedulePolicy) -> StartDecision {
    let Some(snap) = latest else {
        return StartDecision::start(StartReason::NoPriorJob);
    };

    if snap.status == JobStatus::Running {
        let age = now - snap.started_at;
        return if age > Duration::minutes(policy.max_running_minutes) {
            StartDecision::start(StartReason::StaleRunningJob)
        } else {
            StartDecision::skip(StartReason::AlreadyRunning)
        };
    }

    match snap.calc_version.as_deref() {
        None => return StartDecision::start(StartReason::CalcVersionMissing),
        Some(v) if v != policy.required_calc_version => {
            return StartDecision::start(StartReason::CalcVersionChanged);
        }
        Some(_) => {}
    }

    if snap.status == JobStatus::Done && snap.counts.remaining() > 0 {
        return StartDecision::start(StartReason::RemainingWork);
    }

    if snap.cooldown_until.is_some_and(|until| until > now) {
        return StartDecision::skip(StartReason::CooldownActive);
    }

    if snap.status == JobStatus::Error {
        return StartDecision::start(StartReason::PreviousRunFailed);
    }

    if !policy.enforce_cadence {
        return StartDecision::start(StartReason::CadenceNotEnforced);
    }

    match snap.last_calc_window_end {
        None => StartDecision::start(StartReason::CalcWindowMissing),
        Some(end) if now - end < Duration::days(policy.cadence_days) => {
            StartDecision::skip(StartReason::MonthlyCadenceNotElapsed)
        }
        Some(_) => StartDecision::start(StartReason::MonthlyCadenceElapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_client::domain::JobCounts;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-07-15 12:00:00 UTC);

    fn policy() -> SchedulePolicy {
        SchedulePolicy {
            required_calc_version: "v1".to_string(),
            ..SchedulePolicy::default()
        }
    }

    fn done(finished_minutes_ago: i64) -> PipelineJobSnapshot {
        let finished = NOW - Duration::minutes(finished_minutes_ago);
        PipelineJobSnapshot {
            household_id: "h1".to_string(),
            run_id: "r1".to_string(),
            status: JobStatus::Done,
            reason: "monthly_cadence_elapsed".to_string(),
            calc_version: Some("v1".to_string()),
            started_at: finished - Duration::minutes(1),
            finished_at: Some(finished),
            cooldown_until: Some(finished + Duration::minutes(60)),
            last_calc_window_end: Some(finished),
            last_error: None,
            counts: JobCounts {
                rate_plan_ids_count: 10,
                estimates_computed: 4,
                estimates_already_cached: 6,
            },
        }
    }

    fn running(started_minutes_ago: i64) -> PipelineJobSnapshot {
        PipelineJobSnapshot {
            status: JobStatus::Running,
            started_at: NOW - Duration::minutes(started_minutes_ago),
            finished_at: None,
            cooldown_until: None,
            ..done(0)
        }
    }

    fn decide(s: &PipelineJobSnapshot) -> StartDecision {
        should_start(Some(s), NOW, &policy())
    }

    #[test]
    fn first_run_is_allowed() {
        let d = should_start(None, NOW, &policy());
        assert!(d.ok_to_start);
        assert_eq!(d.reason.as_str(), "no_prior_job");
    }

    #[test]
    fn fresh_running_job_blocks() {
        let d = decide(&running(1));
        assert!(!d.ok_to_start);
        assert_eq!(d.reason, StartReason::AlreadyRunning);
    }

    #[test]
    fn stale_running_job_is_recovered() {
        let d = decide(&running(60));
        assert!(d.ok_to_start);
        assert_eq!(d.reason.as_str(), "stale_running_job");
    }

    #[test]
    fn version_bump_overrides_cooldown_and_cadence() {
        let d = should_start(
            Some(&done(5)),
            NOW,
            &SchedulePolicy {
                required_calc_version: "v2".to_string(),
                ..policy()
            },
        );
        assert!(d.ok_to_start);
        assert_eq!(d.reason.as_str(), "calc_version_changed");
    }

    #[test]
    fn missing_version_is_treated_as_changed() {
        let s = PipelineJobSnapshot {
            calc_version: None,
            ..done(5)
        };
        assert_eq!(decide(&s).reason, StartReason::CalcVersionMissing);
        assert!(decide(&s).ok_to_start);
    }

    #[test]
    fn remaining_work_bypasses_cooldown() {
        let mut s = done(5);
        s.counts.estimates_computed = 2;
        let d = decide(&s);
        assert!(d.ok_to_start);
        assert_eq!(d.reason.as_str(), "remaining_work");
    }

    #[test]
    fn active_cooldown_blocks_finished_run() {
        let d = decide(&done(5));
        assert!(!d.ok_to_start);
        assert_eq!(d.reason.as_str(), "cooldown_active");
    }

    #[test]
    fn failed_run_retries_after_cooldown() {
        let mut s = done(30);
        s.status = JobStatus::Error;
        s.cooldown_until = Some(NOW - Duration::minutes(15));
        s.last_error = Some("usage store unavailable".to_string());
        let d = decide(&s);
        assert!(d.ok_to_start);
        assert_eq!(d.reason, StartReason::PreviousRunFailed);

        s.cooldown_until = Some(NOW + Duration::minutes(1));
        assert_eq!(decide(&s).reason, StartReason::CooldownActive);
    }

    #[test]
    fn cadence_gates_completed_runs() {
        let d = decide(&done(10 * 24 * 60));
        assert!(!d.ok_to_start);
        assert_eq!(d.reason.as_str(), "monthly_cadence_not_elapsed");

        let d = decide(&done(31 * 24 * 60));
        assert!(d.ok_to_start);
        assert_eq!(d.reason.as_str(), "monthly_cadence_elapsed");
    }

    #[test]
    fn cadence_can_be_switched_off() {
        let d = should_start(
            Some(&done(10 * 24 * 60)),
            NOW,
            &SchedulePolicy {
                enforce_cadence: false,
                ..policy()
            },
        );
        assert!(d.ok_to_start);
        assert_eq!(d.reason, StartReason::CadenceNotEnforced);
    }

    #[test]
    fn missing_window_end_starts() {
        let s = PipelineJobSnapshot {
            last_calc_window_end: None,
            ..done(10 * 24 * 60)
        };
        assert_eq!(decide(&s).reason, StartReason::CalcWindowMissing);
    }
}
