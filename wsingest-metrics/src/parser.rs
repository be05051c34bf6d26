use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{FieldValue, Metric, ParseErrorKind, ParseMetricError, Timestamp};

/// Converts a raw message payload into metrics.
///
/// Implementations must be deterministic for a given payload and either return all metrics of the
/// payload in order or fail the payload as a whole.
pub trait MetricParser: Send + Sync {
    /// Parses all metrics contained in `payload`.
    ///
    /// An empty result is valid and means that the payload did not contain any metrics.
    fn parse(&self, payload: &[u8]) -> Result<Vec<Metric>, ParseMetricError>;
}

fn now_nanos() -> Timestamp {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Parses InfluxDB line protocol.
///
/// Lines without a timestamp receive the time of parsing, unless a fixed default timestamp is
/// configured with [`with_default_timestamp`](Self::with_default_timestamp).
#[derive(Clone, Debug, Default)]
pub struct InfluxParser {
    default_timestamp: Option<Timestamp>,
}

impl InfluxParser {
    /// Creates a parser that stamps metrics with the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a fixed timestamp for lines that do not carry one.
    pub fn with_default_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.default_timestamp = Some(timestamp);
        self
    }
}

impl MetricParser for InfluxParser {
    fn parse(&self, payload: &[u8]) -> Result<Vec<Metric>, ParseMetricError> {
        let timestamp = self.default_timestamp.unwrap_or_else(now_nanos);
        Metric::parse_all(payload, timestamp).collect()
    }
}

#[derive(Deserialize)]
struct JsonMetric {
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<Timestamp>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    Single(JsonMetric),
    Batch(Vec<JsonMetric>),
}

/// Parses metrics from JSON.
///
/// The payload is either a single object or an array of objects, each with a `name`, optional
/// `tags`, a non-empty `fields` map and an optional `timestamp` in nanoseconds.
#[derive(Clone, Debug, Default)]
pub struct JsonParser {
    default_timestamp: Option<Timestamp>,
}

impl JsonParser {
    /// Creates a parser that stamps metrics with the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a fixed timestamp for objects that do not carry one.
    pub fn with_default_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.default_timestamp = Some(timestamp);
        self
    }
}

impl MetricParser for JsonParser {
    fn parse(&self, payload: &[u8]) -> Result<Vec<Metric>, ParseMetricError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let parsed = serde_json::from_slice::<JsonPayload>(payload).map_err(|error| {
            ParseMetricError::new(error.line(), ParseErrorKind::Json(error.to_string()))
        })?;

        let raw_metrics = match parsed {
            JsonPayload::Single(metric) => vec![metric],
            JsonPayload::Batch(metrics) => metrics,
        };

        let timestamp = self.default_timestamp.unwrap_or_else(now_nanos);

        raw_metrics
            .into_iter()
            .map(|raw| {
                if raw.name.is_empty() {
                    return Err(ParseMetricError::new(1, ParseErrorKind::MissingMeasurement));
                }
                if raw.fields.is_empty() {
                    return Err(ParseMetricError::new(1, ParseErrorKind::MissingFields));
                }

                let keys = raw.tags.iter().flat_map(|(k, v)| [k, v]).chain(raw.fields.keys());
                if std::iter::once(&raw.name).chain(keys).any(|s| s.contains(['\n', '\r'])) {
                    return Err(ParseMetricError::new(1, ParseErrorKind::LineBreak));
                }

                Ok(Metric {
                    name: raw.name,
                    tags: raw.tags,
                    fields: raw.fields,
                    timestamp: raw.timestamp.unwrap_or(timestamp),
                })
            })
            .collect()
    }
}

/// The payload format of incoming messages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// InfluxDB line protocol.
    #[default]
    Influx,
    /// JSON objects in the serialized form of [`Metric`].
    Json,
}

impl DataFormat {
    /// Returns the name of this format as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Influx => "influx",
            Self::Json => "json",
        }
    }

    /// Creates the parser for this format.
    pub fn parser(&self) -> Arc<dyn MetricParser> {
        match self {
            Self::Influx => Arc::new(InfluxParser::new()),
            Self::Json => Arc::new(JsonParser::new()),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing a [`DataFormat`] from a string fails.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("unknown data format `{0}`, expected `influx` or `json`")]
pub struct ParseDataFormatError(String);

impl FromStr for DataFormat {
    type Err = ParseDataFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "influx" => Ok(Self::Influx),
            "json" => Ok(Self::Json),
            _ => Err(ParseDataFormatError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_influx_parser() {
        let parser = InfluxParser::new().with_default_timestamp(42);
        let metrics = parser.parse(b"a value=1\nb value=2 7").unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].timestamp, 42);
        assert_eq!(metrics[1].timestamp, 7);
    }

    #[test]
    fn test_influx_parser_current_time() {
        let before = now_nanos();
        let metrics = InfluxParser::new().parse(b"a value=1").unwrap();
        assert!(metrics[0].timestamp >= before);
    }

    #[test]
    fn test_influx_parser_fails_payload() {
        let result = InfluxParser::new().parse(b"a value=1\nnot-a-valid-line\nb value=2");
        let error = result.unwrap_err();
        assert_eq!(error.line(), 2);
        assert_eq!(error.kind(), &ParseErrorKind::MissingFields);
    }

    #[test]
    fn test_influx_parser_empty() {
        let metrics = InfluxParser::new().parse(b"").unwrap();
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_json_parser_object() {
        let parser = JsonParser::new().with_default_timestamp(42);
        let payload = br#"{"name": "cpu", "tags": {"host": "a"}, "fields": {"load": 0.5}}"#;
        let metrics = parser.parse(payload).unwrap();

        let expected = Metric::new("cpu", 42)
            .with_tag("host", "a")
            .with_field("load", 0.5);
        assert_eq!(metrics, vec![expected]);
    }

    #[test]
    fn test_json_parser_array() {
        let parser = JsonParser::new();
        let payload = br#"[
            {"name": "a", "fields": {"v": 1}, "timestamp": 1},
            {"name": "b", "fields": {"v": "x"}, "timestamp": 2}
        ]"#;
        let metrics = parser.parse(payload).unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].fields["v"], FieldValue::Integer(1));
        assert_eq!(metrics[1].fields["v"], FieldValue::from("x"));
        assert_eq!(metrics[1].timestamp, 2);
    }

    #[test]
    fn test_json_parser_line_break_in_key() {
        let parser = JsonParser::new();
        let payload = br#"{"name": "cpu", "tags": {"host": "a\nb"}, "fields": {"v": 1}}"#;

        let error = parser.parse(payload).unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::LineBreak);

        let payload = br#"{"name": "cpu", "fields": {"msg": "a\nb"}, "timestamp": 1}"#;
        let metrics = parser.parse(payload).unwrap();
        assert_eq!(metrics[0].fields["msg"], FieldValue::from("a\nb"));
    }

    #[test]
    fn test_json_parser_invalid() {
        let parser = JsonParser::new();
        assert!(parser.parse(b"not json").is_err());
        assert!(parser.parse(br#"{"name": "a"}"#).is_err());

        let error = parser.parse(br#"{"name": "a", "fields": {}}"#).unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::MissingFields);
    }

    #[test]
    fn test_data_format() {
        assert_eq!("json".parse::<DataFormat>().unwrap(), DataFormat::Json);
        assert_eq!(DataFormat::default(), DataFormat::Influx);
        insta::assert_snapshot!(
            "csv".parse::<DataFormat>().unwrap_err().to_string(),
            @"unknown data format `csv`, expected `influx` or `json`"
        );
    }

    #[test]
    fn test_data_format_parser() {
        let metrics = DataFormat::Influx.parser().parse(b"a value=1 1").unwrap();
        assert_eq!(metrics[0].name, "a");
    }
}
