use chrono::{Days, Months, NaiveDate};
use tracing::warn;

use rebill_shared::FrequencyUnit;

/// Date of the next charge, counted from `from`.
///
/// Month and year steps land on the last day of the target month when the
/// day does not exist there (Jan 31 + 1 month = Feb 28/29). A non-positive
/// interval is treated as 1.
pub fn next_due_date(from: NaiveDate, interval: i32, unit: FrequencyUnit) -> NaiveDate {
    let interval = if interval < 1 {
        warn!("Frequency interval {} is not positive, using 1", interval);
        1
    } else {
        interval as u32
    };

    let next = match unit {
        FrequencyUnit::Day => from.checked_add_days(Days::new(interval as u64)),
        FrequencyUnit::Week => from.checked_add_days(Days::new(interval as u64 * 7)),
        FrequencyUnit::Month => from.checked_add_months(Months::new(interval)),
        FrequencyUnit::Year => interval
            .checked_mul(12)
            .and_then(|months| from.checked_add_months(Months::new(months))),
    };

    next.unwrap_or(NaiveDate::MAX)
}
