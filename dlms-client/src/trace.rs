//! Frame trace sinks
//!
//! Every frame that crosses the transport is reported to a [`TraceSink`] as
//! `<direction> <elapsed seconds> <hex>`, together with the progress markers
//! of long reads. The sink is owned by the exchanger of one connection.

use dlms_core::to_hex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Default trace file of the command line reader
pub const TRACE_FILE: &str = "trace.txt";

/// Direction of a traced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Sent => "<-",
            Direction::Received => "->",
        }
    }
}

/// Marker character of a progress step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMarker {
    Frame,
    Datablock,
}

impl ProgressMarker {
    pub fn symbol(&self) -> char {
        match self {
            ProgressMarker::Frame => '-',
            ProgressMarker::Datablock => '+',
        }
    }
}

/// Progress moved from `from` to `to` on a 0..=80 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub marker: ProgressMarker,
    pub from: usize,
    pub to: usize,
}

impl ProgressEvent {
    /// One marker character per step gained
    pub fn markers(&self) -> String {
        std::iter::repeat(self.marker.symbol())
            .take(self.to.saturating_sub(self.from))
            .collect()
    }
}

/// Format one trace line
pub fn format_record(direction: Direction, elapsed: Duration, frame: &[u8]) -> String {
    format!(
        "{} {}.{:03}\t{}",
        direction.arrow(),
        elapsed.as_secs(),
        elapsed.subsec_millis(),
        to_hex(frame)
    )
}

/// Receiver of frame records and progress markers
pub trait TraceSink: Send {
    fn frame(&mut self, direction: Direction, elapsed: Duration, frame: &[u8]);

    fn progress(&mut self, _event: ProgressEvent) {}

    /// A read that reported progress has finished
    fn progress_done(&mut self) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl TraceSink for NoTrace {
    fn frame(&mut self, _direction: Direction, _elapsed: Duration, _frame: &[u8]) {}
}

/// Forwards frame records to the `log` facade at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTrace;

impl TraceSink for LogTrace {
    fn frame(&mut self, direction: Direction, elapsed: Duration, frame: &[u8]) {
        log::trace!("{}", format_record(direction, elapsed, frame));
    }

    fn progress(&mut self, event: ProgressEvent) {
        log::trace!("progress {} -> {}/80", event.from, event.to);
    }
}

/// Appends frame records to a file
///
/// With `echo` set, records are also printed on stdout and progress markers
/// are drawn there.
pub struct FileTrace {
    writer: BufWriter<File>,
    echo: bool,
    failed: bool,
}

impl FileTrace {
    /// Open the trace file for appending, creating it when missing
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            echo: false,
            failed: false,
        })
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn write_line(&mut self, line: &str) {
        if self.failed {
            return;
        }
        if let Err(e) = writeln!(self.writer, "{}", line) {
            log::warn!("trace file write failed, tracing to file stopped: {}", e);
            self.failed = true;
        }
    }
}

impl TraceSink for FileTrace {
    fn frame(&mut self, direction: Direction, elapsed: Duration, frame: &[u8]) {
        let line = format_record(direction, elapsed, frame);
        if self.echo {
            println!("{}", line);
        }
        self.write_line(&line);
    }

    fn progress(&mut self, event: ProgressEvent) {
        if self.echo {
            print!("{}", event.markers());
            let _ = io::stdout().flush();
        }
    }

    fn progress_done(&mut self) {
        if self.echo {
            println!();
        }
    }
}

impl Drop for FileTrace {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Reports to two sinks
pub struct TeeTrace<A, B> {
    first: A,
    second: B,
}

impl<A: TraceSink, B: TraceSink> TeeTrace<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: TraceSink, B: TraceSink> TraceSink for TeeTrace<A, B> {
    fn frame(&mut self, direction: Direction, elapsed: Duration, frame: &[u8]) {
        self.first.frame(direction, elapsed, frame);
        self.second.frame(direction, elapsed, frame);
    }

    fn progress(&mut self, event: ProgressEvent) {
        self.first.progress(event);
        self.second.progress(event);
    }

    fn progress_done(&mut self) {
        self.first.progress_done();
        self.second.progress_done();
    }
}

impl TraceSink for Box<dyn TraceSink> {
    fn frame(&mut self, direction: Direction, elapsed: Duration, frame: &[u8]) {
        (**self).frame(direction, elapsed, frame)
    }

    fn progress(&mut self, event: ProgressEvent) {
        (**self).progress(event)
    }

    fn progress_done(&mut self) {
        (**self).progress_done()
    }
}
