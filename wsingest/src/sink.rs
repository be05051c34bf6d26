use std::io::{self, Write};

use parking_lot::Mutex;
use wsingest_metrics::{Metric, MetricSink, SinkError};

/// A sink writing each metric as one line of line protocol.
#[derive(Debug)]
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> MetricSink for LineSink<W> {
    fn accept(&self, metric: Metric) -> Result<(), SinkError> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{metric}")
            .and_then(|_| writer.flush())
            .map_err(|error| match error.kind() {
                io::ErrorKind::BrokenPipe => SinkError::Closed,
                _ => SinkError::Other(Box::new(error)),
            })
    }
}
