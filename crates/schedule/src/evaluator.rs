//! Occurrence evaluation over a `RecurrenceSchedule`.

use chrono::{DateTime, Duration, Months, Utc};

use crate::{Cadence, RecurrenceSchedule};

/// Port for resolving a schedule definition into concrete occurrence
/// timestamps.
///
/// `next_after` promises the smallest occurrence strictly greater than
/// `after` for a well-formed schedule. A malformed cadence (zero spacing)
/// cannot make progress; the stuck candidate is handed back as-is so that
/// callers' loop-termination guards can trip on it instead of spinning.
pub trait ScheduleEvaluator: Send + Sync {
    /// The schedule's first occurrence, if it has any.
    fn first_start(&self, schedule: &RecurrenceSchedule) -> Option<DateTime<Utc>>;

    /// Smallest occurrence strictly after `after` (see trait docs for the
    /// malformed-cadence caveat).
    fn next_after(
        &self,
        schedule: &RecurrenceSchedule,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>>;

    /// All occurrences in `[from, to)`, in order.
    fn occurrences_between(
        &self,
        schedule: &RecurrenceSchedule,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>>;
}

/// Calendar-arithmetic evaluator: daily/weekly spacing is exact day math,
/// monthly spacing clamps to the end of shorter months (Jan 31 -> Feb 28).
#[derive(Debug, Clone, Default)]
pub struct CalendarScheduleEvaluator;

impl CalendarScheduleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Occurrence following `occ`, ignoring `until`.
    fn advance(&self, cadence: Cadence, occ: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match cadence {
            Cadence::Once => None,
            Cadence::Daily { every_days } => Some(occ + Duration::days(i64::from(every_days))),
            Cadence::Weekly { every_weeks } => {
                Some(occ + Duration::days(7 * i64::from(every_weeks)))
            }
            Cadence::Monthly { every_months } => occ.checked_add_months(Months::new(every_months)),
        }
    }

    fn clip(&self, schedule: &RecurrenceSchedule, occ: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match schedule.until {
            Some(until) if occ > until => None,
            _ => Some(occ),
        }
    }
}

impl ScheduleEvaluator for CalendarScheduleEvaluator {
    fn first_start(&self, schedule: &RecurrenceSchedule) -> Option<DateTime<Utc>> {
        self.clip(schedule, schedule.start_at)
    }

    fn next_after(
        &self,
        schedule: &RecurrenceSchedule,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if schedule.start_at > after {
            return self.clip(schedule, schedule.start_at);
        }

        let mut cur = schedule.start_at;
        loop {
            let next = self.advance(schedule.cadence, cur)?;
            if next <= cur {
                // Zero-spacing cadence: surface the stuck candidate.
                return self.clip(schedule, next);
            }
            if next > after {
                return self.clip(schedule, next);
            }
            cur = next;
        }
    }

    fn occurrences_between(
        &self,
        schedule: &RecurrenceSchedule,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut cursor = from - Duration::milliseconds(1);
        while let Some(next) = self.next_after(schedule, cursor) {
            if next <= cursor || next >= to {
                break;
            }
            out.push(next);
            cursor = next;
        }
        out
    }
}
