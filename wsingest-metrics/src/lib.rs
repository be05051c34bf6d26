//! Metric protocol, parsers and sinks.
//!
//! Payloads received by the WebSocket input are converted into [`Metric`]s by a [`MetricParser`]
//! and handed to a [`MetricSink`] one at a time. Two data formats are supported, selected through
//! [`DataFormat`]:
//!
//!  - `influx`: InfluxDB line protocol, one metric per line. See [`Metric::parse_all`].
//!  - `json`: a JSON object or an array of objects in the serialized form of [`Metric`].
//!
//! # Line Protocol
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! Field values are floats by default. A trailing `i` marks a signed integer, a trailing `u` an
//! unsigned integer. Strings are enclosed in double quotes, and booleans are written as `t`,
//! `true`, `f` or `false` in any common capitalization. Timestamps are nanoseconds since the UNIX
//! epoch and fall back to the time of parsing when omitted.
//!
//! ```
//! use wsingest_metrics::{FieldValue, Metric};
//!
//! let metric = Metric::parse(b"cpu,host=a usage=0.5 1000000000", 0).unwrap();
//! assert_eq!(metric.name, "cpu");
//! assert_eq!(metric.tags["host"], "a");
//! assert_eq!(metric.fields["usage"], FieldValue::Float(0.5));
//! assert_eq!(metric.timestamp, 1_000_000_000);
//! ```

#![warn(missing_docs)]

mod parser;
mod protocol;
mod sink;

pub use self::parser::*;
pub use self::protocol::*;
pub use self::sink::*;
