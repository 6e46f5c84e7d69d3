use chrono::{DateTime, TimeZone, Utc};

const MILLIS_THRESHOLD: i64 = 10_000_000_000;

fn utc_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

/// Decode an epoch-seconds column, tolerating values written in milliseconds.
pub fn utc_from_epoch_seconds_lossy(ts: i64) -> DateTime<Utc> {
    if ts.abs() >= MILLIS_THRESHOLD
        && let Some(dt) = Utc.timestamp_opt(ts / 1000, 0).single()
    {
        log::warn!("Coerced milliseconds timestamp to seconds (ts={ts})");
        return dt;
    }

    if let Some(dt) = Utc.timestamp_opt(ts, 0).single() {
        return dt;
    }

    log::warn!("Invalid epoch seconds timestamp (ts={ts}); falling back to epoch");
    utc_epoch()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_seconds() {
        let dt = utc_from_epoch_seconds_lossy(1_757_116_800);
        assert_eq!(dt.timestamp(), 1_757_116_800);
    }

    #[test]
    fn coerces_milliseconds() {
        let dt = utc_from_epoch_seconds_lossy(1_757_116_800_123);
        assert_eq!(dt.timestamp(), 1_757_116_800);
    }
}
