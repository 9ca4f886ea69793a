use chrono::{DateTime, TimeZone, Utc};

use crate::event::Metric;

/// Sends logs to the test output when `TEST_LOG` is set, e.g.
/// `TEST_LOG=debug cargo test`.
pub fn trace_init() {
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "off".to_owned());
    crate::trace::init(false, false, &levels);
}

pub fn ts(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap()
}

/// A metric with one integer field and a `host` tag.
pub fn metric(name: &str, field: &str, value: i64, second: u32) -> Metric {
    Metric::new(name, ts(second))
        .with_field(field, value)
        .with_tag("host", "x")
}
