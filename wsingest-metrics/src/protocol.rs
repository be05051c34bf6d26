use std::collections::BTreeMap;
use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

/// Nanoseconds since the UNIX epoch.
pub type Timestamp = i64;

/// The typed value of a metric field.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A boolean, written as `t`, `true`, `f` or `false`.
    Boolean(bool),
    /// A signed 64-bit integer, written with an `i` suffix.
    Integer(i64),
    /// An unsigned 64-bit integer, written with a `u` suffix.
    Unsigned(u64),
    /// A finite 64-bit float. This is the default for numbers.
    Float(f64),
    /// A string enclosed in double quotes.
    String(String),
}

impl FieldValue {
    /// Parses an unquoted field value.
    fn parse_raw(raw: &str) -> Option<Self> {
        match raw {
            "t" | "T" | "true" | "True" | "TRUE" => return Some(Self::Boolean(true)),
            "f" | "F" | "false" | "False" | "FALSE" => return Some(Self::Boolean(false)),
            _ => (),
        }

        if let Some(int) = raw.strip_suffix('i') {
            return int.parse().ok().map(Self::Integer);
        }

        if let Some(uint) = raw.strip_suffix('u') {
            return uint.parse().ok().map(Self::Unsigned);
        }

        raw.parse::<f64>()
            .ok()
            .filter(|float| float.is_finite())
            .map(Self::Float)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(value) => value.fmt(f),
            Self::Integer(value) => write!(f, "{value}i"),
            Self::Unsigned(value) => write!(f, "{value}u"),
            Self::Float(value) => value.fmt(f),
            Self::String(value) => {
                f.write_str("\"")?;
                for c in value.chars() {
                    match c {
                        '"' | '\\' => write!(f, "\\{c}")?,
                        '\n' => f.write_str("\\n")?,
                        _ => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// The reason a line could not be parsed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    /// The line is not valid UTF-8.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// The line starts with a separator instead of a measurement name.
    #[error("missing measurement name")]
    MissingMeasurement,
    /// The line has no field set.
    #[error("missing fields")]
    MissingFields,
    /// A tag is missing its key, its value or the `=` between them.
    #[error("invalid tag")]
    InvalidTag,
    /// A field is missing its key or the `=` before its value.
    #[error("invalid field")]
    InvalidField,
    /// A field value is not a valid number, boolean or string.
    #[error("invalid field value")]
    InvalidFieldValue,
    /// A string field value has no closing quote.
    #[error("unterminated string field value")]
    UnterminatedString,
    /// The trailing timestamp is not a valid integer.
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// A measurement name, tag or field key contains a line break.
    #[error("line break in measurement, tag or field key")]
    LineBreak,
    /// A JSON payload is malformed or does not describe metrics.
    #[error("invalid json: {0}")]
    Json(String),
}

/// An error returned by [`Metric::parse`] and [`Metric::parse_all`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("failed to parse metric on line {line}: {kind}")]
pub struct ParseMetricError {
    line: usize,
    kind: ParseErrorKind,
}

impl ParseMetricError {
    /// Creates a new error for the given 1-based line number.
    pub fn new(line: usize, kind: ParseErrorKind) -> Self {
        Self { line, kind }
    }

    /// Returns the 1-based line number of the payload that failed to parse.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Returns the reason for the failure.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }
}

/// Reads an identifier up to the first unescaped character in `stops`.
///
/// A backslash followed by a backslash or a character in `escapes` yields that character. All
/// other backslashes are kept literally. Returns the unescaped identifier and the remainder, which
/// starts with the stop character or is empty.
fn read_ident<'a>(input: &'a str, stops: &[char], escapes: &[char]) -> (String, &'a str) {
    let mut ident = String::new();
    let mut chars = input.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&(_, next)) if next == '\\' || escapes.contains(&next) => {
                    ident.push(next);
                    chars.next();
                }
                _ => ident.push(c),
            }
        } else if stops.contains(&c) {
            return (ident, &input[index..]);
        } else {
            ident.push(c);
        }
    }

    (ident, "")
}

/// Reads a quoted string. `input` starts right after the opening quote.
fn read_string(input: &str) -> Result<(String, &str), ParseErrorKind> {
    let mut string = String::new();
    let mut chars = input.char_indices();

    while let Some((index, c)) = chars.next() {
        match c {
            '"' => return Ok((string, &input[index + 1..])),
            '\\' => match chars.next() {
                Some((_, escaped @ ('"' | '\\'))) => string.push(escaped),
                Some((_, 'n')) => string.push('\n'),
                Some((_, other)) => {
                    string.push('\\');
                    string.push(other);
                }
                None => break,
            },
            _ => string.push(c),
        }
    }

    Err(ParseErrorKind::UnterminatedString)
}

const MEASUREMENT_ESCAPES: &[char] = &[',', ' '];
const KEY_ESCAPES: &[char] = &[',', '=', ' '];

/// A single metric in line protocol representation.
///
/// A metric consists of a measurement name, an optional set of tags, at least one field, and a
/// timestamp. To parse a payload with one metric per line, use [`Metric::parse_all`].
///
/// The `Display` implementation renders the metric back into line protocol that parses to an
/// equal metric. Line breaks in string field values are written as `\n`. Line breaks in the
/// measurement name, tags or field keys cannot be represented.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Metric {
    /// The measurement name.
    pub name: String,

    /// Tags identifying the series of this metric, sorted by key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// The field set of this metric, sorted by key.
    pub fields: BTreeMap<String, FieldValue>,

    /// Nanoseconds since the UNIX epoch.
    pub timestamp: Timestamp,
}

impl Metric {
    /// Creates a metric without tags or fields.
    pub fn new(name: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Adds a tag to this metric.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field to this metric.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    fn parse_str(string: &str, timestamp: Timestamp) -> Result<Self, ParseErrorKind> {
        let (name, mut rest) = read_ident(string, MEASUREMENT_ESCAPES, MEASUREMENT_ESCAPES);
        if name.is_empty() {
            return Err(ParseErrorKind::MissingMeasurement);
        }

        let mut metric = Self::new(name, timestamp);

        while let Some(tag) = rest.strip_prefix(',') {
            let (key, after_key) = read_ident(tag, &['=', ',', ' '], KEY_ESCAPES);
            let after_eq = after_key
                .strip_prefix('=')
                .ok_or(ParseErrorKind::InvalidTag)?;
            let (value, after_value) = read_ident(after_eq, &[',', ' '], KEY_ESCAPES);
            if key.is_empty() || value.is_empty() {
                return Err(ParseErrorKind::InvalidTag);
            }

            metric.tags.insert(key, value);
            rest = after_value;
        }

        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseErrorKind::MissingFields);
        }

        loop {
            let (key, after_key) = read_ident(rest, &['=', ',', ' '], KEY_ESCAPES);
            let after_eq = after_key
                .strip_prefix('=')
                .ok_or(ParseErrorKind::InvalidField)?;
            if key.is_empty() {
                return Err(ParseErrorKind::InvalidField);
            }

            let (value, after_value) = match after_eq.strip_prefix('"') {
                Some(quoted) => {
                    let (string, remainder) = read_string(quoted)?;
                    (FieldValue::String(string), remainder)
                }
                None => {
                    let end = after_eq.find([',', ' ']).unwrap_or(after_eq.len());
                    let value = FieldValue::parse_raw(&after_eq[..end])
                        .ok_or(ParseErrorKind::InvalidFieldValue)?;
                    (value, &after_eq[end..])
                }
            };

            metric.fields.insert(key, value);

            match after_value.strip_prefix(',') {
                Some(next) => rest = next,
                None => {
                    rest = after_value;
                    break;
                }
            }
        }

        let raw_timestamp = rest.trim_matches(' ');
        if !raw_timestamp.is_empty() {
            metric.timestamp = raw_timestamp
                .parse()
                .map_err(|_| ParseErrorKind::InvalidTimestamp)?;
        }

        Ok(metric)
    }

    /// Parses a single metric from line protocol.
    ///
    /// If the line does not carry a timestamp, `timestamp` is used instead.
    pub fn parse(slice: &[u8], timestamp: Timestamp) -> Result<Self, ParseMetricError> {
        let string = std::str::from_utf8(slice)
            .map_err(|_| ParseMetricError::new(1, ParseErrorKind::InvalidUtf8))?;
        Self::parse_str(string.trim_end_matches(['\r', '\n']), timestamp)
            .map_err(|kind| ParseMetricError::new(1, kind))
    }

    /// Parses a set of metrics from line protocol.
    ///
    /// Metrics are separated by newlines. Empty lines and lines starting with `#` are skipped, and
    /// `\r\n` line endings are accepted. Each line is parsed independently, so an invalid line
    /// yields an error without affecting the others.
    ///
    /// # Example
    ///
    /// ```
    /// use wsingest_metrics::Metric;
    ///
    /// let data = br#"
    /// ## cpu load
    /// cpu,host=a load=0.5 1000000000
    /// mem,host=a used=1024i 1000000000
    /// "#;
    ///
    /// for metric_result in Metric::parse_all(data, 0) {
    ///     let metric = metric_result.expect("metric should parse");
    ///     println!("{metric}");
    /// }
    /// ```
    pub fn parse_all(slice: &[u8], timestamp: Timestamp) -> ParseMetrics<'_> {
        ParseMetrics {
            slice,
            timestamp,
            line: 0,
        }
    }
}

fn escape(f: &mut fmt::Formatter<'_>, value: &str, escapes: &[char]) -> fmt::Result {
    for c in value.chars() {
        if c == '\\' || escapes.contains(&c) {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        escape(f, &self.name, MEASUREMENT_ESCAPES)?;

        for (key, value) in &self.tags {
            f.write_str(",")?;
            escape(f, key, KEY_ESCAPES)?;
            f.write_str("=")?;
            escape(f, value, KEY_ESCAPES)?;
        }

        for (index, (key, value)) in self.fields.iter().enumerate() {
            f.write_str(if index == 0 { " " } else { "," })?;
            escape(f, key, KEY_ESCAPES)?;
            write!(f, "={value}")?;
        }

        write!(f, " {}", self.timestamp)
    }
}

/// Iterator over parsed metrics returned from [`Metric::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseMetrics<'a> {
    slice: &'a [u8],
    timestamp: Timestamp,
    line: usize,
}

impl Iterator for ParseMetrics<'_> {
    type Item = Result<Metric, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();
            self.line += 1;

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => {
                    return Some(Err(ParseMetricError::new(
                        self.line,
                        ParseErrorKind::InvalidUtf8,
                    )));
                }
            };

            let trimmed = string.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            return Some(
                Metric::parse_str(trimmed, self.timestamp)
                    .map_err(|kind| ParseMetricError::new(self.line, kind)),
            );
        }
    }
}

impl FusedIterator for ParseMetrics<'_> {}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn parse_err(s: &str) -> ParseErrorKind {
        Metric::parse(s.as_bytes(), 4711).unwrap_err().kind().clone()
    }

    #[test]
    fn test_parse_basic() {
        let metric = Metric::parse(b"metric,tag=a value=1 1000000000", 4711).unwrap();
        insta::assert_debug_snapshot!(metric, @r#"
        Metric {
            name: "metric",
            tags: {
                "tag": "a",
            },
            fields: {
                "value": Float(
                    1.0,
                ),
            },
            timestamp: 1000000000,
        }
        "#);
    }

    #[test]
    fn test_parse_default_timestamp() {
        let metric = Metric::parse(b"cpu load=0.5", 4711).unwrap();
        assert_eq!(metric.timestamp, 4711);
        assert!(metric.tags.is_empty());
    }

    #[test]
    fn test_parse_field_types() {
        let s = r#"m f=1.5,i=-3i,u=7u,s="hello",b=true,n=F"#;
        let metric = Metric::parse(s.as_bytes(), 0).unwrap();

        let expected = Metric::new("m", 0)
            .with_field("f", 1.5)
            .with_field("i", -3i64)
            .with_field("u", 7u64)
            .with_field("s", "hello")
            .with_field("b", true)
            .with_field("n", false);

        assert_eq!(metric, expected);
    }

    #[test]
    fn test_parse_escapes() {
        let s = r#"my\ cpu,host\=name=a\,b,dc=eu\ west val\ue="say \"hi\" \\o/" 1"#;
        let metric = Metric::parse(s.as_bytes(), 0).unwrap();

        assert_eq!(metric.name, "my cpu");
        assert_eq!(metric.tags["host=name"], "a,b");
        assert_eq!(metric.tags["dc"], "eu west");
        assert_eq!(
            metric.fields["val\\ue"],
            FieldValue::String(r#"say "hi" \o/"#.to_owned())
        );
        assert_eq!(metric.timestamp, 1);
    }

    #[test]
    fn test_parse_string_with_separators() {
        let metric = Metric::parse(br#"log msg="a, b=c d" 5"#, 0).unwrap();
        assert_eq!(metric.fields["msg"], FieldValue::from("a, b=c d"));
        assert_eq!(metric.timestamp, 5);
    }

    #[test]
    fn test_parse_not_a_valid_line() {
        assert_eq!(parse_err("not-a-valid-line"), ParseErrorKind::MissingFields);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_err(",tag=a value=1"), ParseErrorKind::MissingMeasurement);
        assert_eq!(parse_err("m,tag value=1"), ParseErrorKind::InvalidTag);
        assert_eq!(parse_err("m,=a value=1"), ParseErrorKind::InvalidTag);
        assert_eq!(parse_err("m,tag=a "), ParseErrorKind::MissingFields);
        assert_eq!(parse_err("m value"), ParseErrorKind::InvalidField);
        assert_eq!(parse_err("m =1"), ParseErrorKind::InvalidField);
        assert_eq!(parse_err("m value=abc"), ParseErrorKind::InvalidFieldValue);
        assert_eq!(parse_err("m value="), ParseErrorKind::InvalidFieldValue);
        assert_eq!(parse_err("m value=NaN"), ParseErrorKind::InvalidFieldValue);
        assert_eq!(parse_err("m value=-1u"), ParseErrorKind::InvalidFieldValue);
        assert_eq!(parse_err(r#"m value="open"#), ParseErrorKind::UnterminatedString);
        assert_eq!(parse_err("m value=1 soon"), ParseErrorKind::InvalidTimestamp);
        assert_eq!(parse_err("m value=1 1 2"), ParseErrorKind::InvalidTimestamp);
    }

    #[test]
    fn test_parse_invalid_utf8() {
        let error = Metric::parse(b"m value=\xff", 0).unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::InvalidUtf8);
    }

    #[test]
    fn test_error_display() {
        let error = Metric::parse_all(b"\nnot-a-valid-line", 0).next().unwrap();
        insta::assert_snapshot!(
            error.unwrap_err().to_string(),
            @"failed to parse metric on line 2: missing fields"
        );
    }

    #[test]
    fn test_parse_all() {
        let s = "cpu value=1 1\nmem value=2 2";
        let metrics: Vec<Metric> = Metric::parse_all(s.as_bytes(), 0)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "cpu");
        assert_eq!(metrics[1].name, "mem");
    }

    #[test]
    fn test_parse_all_crlf() {
        let s = "cpu value=1 1\r\nmem value=2 2\r\n";
        let metrics: Vec<Metric> = Metric::parse_all(s.as_bytes(), 0)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].timestamp, 1);
    }

    #[test]
    fn test_parse_all_comments_and_empty_lines() {
        let s = "# header\n\ncpu value=1\n   \n# trailer\n";
        let metric_count = Metric::parse_all(s.as_bytes(), 0).count();
        assert_eq!(metric_count, 1);
    }

    #[test]
    fn test_parse_all_line_numbers() {
        let s = "cpu value=1\n\nbroken\ncpu value=2";
        let results: Vec<_> = Metric::parse_all(s.as_bytes(), 0).collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().line(), 3);
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_display_line_protocol() {
        let metric = Metric::new("my cpu", 1000)
            .with_tag("host", "a,b")
            .with_field("load", 0.5)
            .with_field("count", 3i64)
            .with_field("msg", r#"say "hi""#);

        insta::assert_snapshot!(
            metric.to_string(),
            @r#"my\ cpu,host=a\,b count=3i,load=0.5,msg="say \"hi\"" 1000"#
        );

        let reparsed = Metric::parse(metric.to_string().as_bytes(), 0).unwrap();
        assert_eq!(reparsed, metric);
    }

    #[test]
    fn test_display_line_break_and_backslash() {
        let metric = Metric::new("m", 1)
            .with_tag("t", "a\\")
            .with_tag("dir", "C:\\new")
            .with_field("s", "a\nb")
            .with_field("raw", "x\\ny");

        insta::assert_snapshot!(
            metric.to_string(),
            @r#"m,dir=C:\\new,t=a\\ raw="x\\ny",s="a\nb" 1"#
        );

        let lines: Vec<_> = Metric::parse_all(metric.to_string().as_bytes(), 0).collect();
        assert_eq!(lines, vec![Ok(metric)]);
    }

    #[test]
    fn test_parse_double_backslash() {
        let metric = Metric::parse(br"m,t=a\\ v=1 1", 0).unwrap();
        assert_eq!(metric.tags["t"], "a\\");
        assert_eq!(metric.fields["v"], FieldValue::Float(1.0));
    }

    #[test]
    fn test_serialize_json() {
        let metric = Metric::new("cpu", 1)
            .with_tag("host", "a")
            .with_field("load", 0.5)
            .with_field("up", true);

        insta::assert_json_snapshot!(metric, @r#"
        {
          "name": "cpu",
          "tags": {
            "host": "a"
          },
          "fields": {
            "load": 0.5,
            "up": true
          },
          "timestamp": 1
        }
        "#);
    }

    #[test]
    fn test_deserialize_field_values() {
        let json = r#"{"a": 1, "b": 1.5, "c": 18446744073709551615, "d": "x", "e": false}"#;
        let fields: BTreeMap<String, FieldValue> = serde_json::from_str(json).unwrap();

        assert_eq!(fields["a"], FieldValue::Integer(1));
        assert_eq!(fields["b"], FieldValue::Float(1.5));
        assert_eq!(fields["c"], FieldValue::Unsigned(u64::MAX));
        assert_eq!(fields["d"], FieldValue::from("x"));
        assert_eq!(fields["e"], FieldValue::Boolean(false));
    }
}
