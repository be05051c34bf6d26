//! WebSocket ingestion for wsingest.
//!
//! The [`WebSocketInput`] is the entry point for hosts. It establishes a single WebSocket
//! connection, either by dialing a URL or by accepting one peer on a listening socket, and runs an
//! [`IngestLoop`] in a background task. The loop reads text frames one at a time, parses them with
//! a [`MetricParser`](wsingest_metrics::MetricParser) and forwards the resulting metrics to a
//! [`MetricSink`](wsingest_metrics::MetricSink).
//!
//! ```text
//!  peer ──frames──▶ Connection ──RawMessage──▶ IngestLoop ──Metric──▶ sink
//!                      ▲                           ▲
//!                      └──── close ─── WebSocketInput ─── shutdown ───┘
//! ```
//!
//! Failures are isolated per message: a payload that fails to parse or a metric the sink rejects
//! is logged and counted in [`IngestStats`], and the loop continues with the next message. A read
//! failure ends the loop for good; there is no reconnect.

#![warn(missing_docs)]

mod connection;
mod error;
mod ingest;
mod input;

pub use self::connection::*;
pub use self::error::*;
pub use self::ingest::*;
pub use self::input::*;
