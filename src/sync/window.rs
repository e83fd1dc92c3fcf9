//! Computes the next usage fetch window for one (consumer, property) pair.

use chrono::{Duration, NaiveDate};

/// Inclusive calendar-day window, civil dates in the property's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Plan the window to request next.
///
/// With no stored history the last `preload_days` days are backfilled;
/// otherwise the window starts the day after the latest stored date. Returns
/// `None` when the window would be inverted (history already covers today),
/// in which case no request must be issued.
pub fn plan(
    latest_stored: Option<NaiveDate>,
    today: NaiveDate,
    preload_days: u32,
) -> Option<UsageWindow> {
    let from = match latest_stored {
        Some(latest) => latest + Duration::days(1),
        None => today - Duration::days(i64::from(preload_days)),
    };

    if from > today {
        return None;
    }
    Some(UsageWindow { from, to: today })
}
