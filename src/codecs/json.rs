use std::{collections::BTreeMap, io};

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tokio_util::codec::Encoder;

use crate::event::{FieldValue, Metric};

/// Errors raised while encoding a metric.
#[derive(Debug, Snafu)]
pub enum SerializeError {
    #[snafu(display("Field {:?} of metric {:?} has non-finite value {}", field, metric, value))]
    NonFiniteField {
        metric: String,
        field: String,
        value: FieldValue,
    },
    #[snafu(display("Failed to encode metric {:?} as JSON: {}", metric, source))]
    Json {
        metric: String,
        source: serde_json::Error,
    },
    #[snafu(display("I/O error while encoding: {}", source))]
    Io { source: io::Error },
}

impl From<io::Error> for SerializeError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

/// Config used to build a `JsonSerializer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializerConfig;

impl JsonSerializerConfig {
    /// Build the `JsonSerializer` from this configuration.
    pub const fn build(&self) -> JsonSerializer {
        JsonSerializer
    }
}

/// Serializer that converts a `Metric` into one line of newline delimited JSON.
///
/// Each record has the shape
/// `{"fields":{..},"name":"..","tags":{..},"timestamp":".."}` followed by a
/// `\n`, so every line can be parsed on its own. The timestamp is RFC 3339
/// in UTC with up to nanosecond precision; trailing zeros of the fraction are
/// dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

#[derive(Serialize)]
struct Record<'a> {
    fields: &'a BTreeMap<String, FieldValue>,
    name: &'a str,
    tags: &'a BTreeMap<String, String>,
    timestamp: String,
}

impl Encoder<Metric> for JsonSerializer {
    type Error = SerializeError;

    fn encode(&mut self, metric: Metric, buffer: &mut BytesMut) -> Result<(), Self::Error> {
        // serde_json would write these as `null`; the store would then load a
        // different value than the one measured.
        if let Some((field, value)) = metric.fields().iter().find(|(_, v)| v.is_non_finite()) {
            return NonFiniteFieldSnafu {
                metric: metric.name(),
                field: field.as_str(),
                value: value.clone(),
            }
            .fail();
        }

        let record = Record {
            fields: metric.fields(),
            name: metric.name(),
            tags: metric.tags(),
            timestamp: rfc3339_nanos(metric.timestamp()),
        };

        // Encode into a scratch buffer so a failure never leaves a partial
        // record in `buffer`.
        let mut line = BytesMut::new();
        serde_json::to_writer((&mut line).writer(), &record).context(JsonSnafu {
            metric: metric.name(),
        })?;
        line.put_u8(b'\n');
        buffer.extend_from_slice(&line);
        Ok(())
    }
}

fn rfc3339_nanos(timestamp: DateTime<Utc>) -> String {
    let mut formatted = timestamp.format("%Y-%m-%dT%H:%M:%S%.9f").to_string();
    let len = formatted.trim_end_matches('0').trim_end_matches('.').len();
    formatted.truncate(len);
    formatted.push('Z');
    formatted
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};

    use super::*;

    fn serialize(metric: Metric) -> Result<BytesMut, SerializeError> {
        let mut buffer = BytesMut::new();
        JsonSerializerConfig.build().encode(metric, &mut buffer)?;
        Ok(buffer)
    }

    #[test]
    fn serialize_json_metric() {
        let timestamp = Utc
            .with_ymd_and_hms(2018, 11, 14, 8, 9, 10)
            .single()
            .and_then(|t| t.with_nanosecond(11))
            .expect("invalid timestamp");
        let metric = Metric::new("cpu", timestamp)
            .with_field("usage", 10.5)
            .with_field("cores", 4_i64)
            .with_field("throttled", false)
            .with_tag("host", "x");

        let bytes = serialize(metric).unwrap();

        assert_eq!(
            bytes,
            "{\"fields\":{\"cores\":4,\"throttled\":false,\"usage\":10.5},\"name\":\"cpu\",\"tags\":{\"host\":\"x\"},\"timestamp\":\"2018-11-14T08:09:10.000000011Z\"}\n"
        );
    }

    #[test]
    fn timestamps_drop_trailing_zeros() {
        let second = Utc.with_ymd_and_hms(2018, 11, 14, 8, 9, 10).unwrap();

        assert_eq!(rfc3339_nanos(second), "2018-11-14T08:09:10Z");
        assert_eq!(
            rfc3339_nanos(second.with_nanosecond(500_000_000).unwrap()),
            "2018-11-14T08:09:10.5Z"
        );
        assert_eq!(
            rfc3339_nanos(second.with_nanosecond(120_000).unwrap()),
            "2018-11-14T08:09:10.00012Z"
        );
    }

    #[test]
    fn serialize_appends_one_line_per_metric() {
        let timestamp = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let mut serializer = JsonSerializer;
        let mut buffer = BytesMut::new();
        serializer
            .encode(Metric::new("a", timestamp).with_field("v", 1_u64), &mut buffer)
            .unwrap();
        serializer
            .encode(Metric::new("b", timestamp).with_field("v", "up"), &mut buffer)
            .unwrap();

        let lines = std::str::from_utf8(&buffer).unwrap().lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        for (line, name) in lines.iter().zip(["a", "b"]) {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["name"], name);
            assert_eq!(value["timestamp"], "2020-09-13T12:26:40Z");
        }
    }

    #[test]
    fn serialize_rejects_non_finite_fields() {
        let metric = Metric::new("cpu", Utc.timestamp_opt(0, 0).unwrap())
            .with_field("usage", f64::NAN);

        let mut buffer = BytesMut::from("prefix");
        let error = JsonSerializer.encode(metric, &mut buffer).unwrap_err();

        assert!(matches!(error, SerializeError::NonFiniteField { ref field, .. } if field == "usage"));
        assert_eq!(buffer, "prefix");
    }
}
