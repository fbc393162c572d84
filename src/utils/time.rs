use chrono::{DateTime, Utc};

pub fn time_millis() -> i64 {
    let time: DateTime<chrono::Utc> = Utc::now();
    time.timestamp_millis()
}

/// Format an elapsed duration in milliseconds as a compact string
/// suitable for a running-jobs menu entry.
pub fn format_elapsed(millis: i64) -> String {
    let seconds = millis.max(0) / 1000;
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "0s");
        assert_eq!(format_elapsed(59_000), "59s");
        assert_eq!(format_elapsed(200_000), "3m 20s");
        assert_eq!(format_elapsed(3_720_000), "1h 2m");
        assert_eq!(format_elapsed(-500), "0s");
    }
}
