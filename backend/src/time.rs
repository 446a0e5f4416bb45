use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Wall-clock milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Local calendar date and time-of-day, as used by the serving window checks.
pub fn local_today_and_now() -> (NaiveDate, NaiveTime) {
    let now = Local::now().naive_local();
    (now.date(), now.time())
}

/// Time left until the next local 00:00 after `now`.
pub fn until_next_midnight(now: NaiveDateTime) -> Duration {
    let Some(tomorrow) = now.date().succ_opt() else {
        return Duration::ZERO;
    };
    let midnight = tomorrow.and_time(NaiveTime::MIN);

    (midnight - now).to_std().unwrap_or(Duration::ZERO)
}
