//! Block reassembly loop
//!
//! Long replies arrive split at two levels: HDLC segments of one APDU
//! (continued with receiver-ready frames) and application datablocks
//! (continued with GET-next requests). [`read_data_block`] drives both until
//! the engine reports nothing more pending.

use crate::engine::{ProtocolEngine, RequestType};
use crate::exchange::PacketExchanger;
use crate::trace::{ProgressEvent, ProgressMarker};
use bytes::BytesMut;
use dlms_core::DlmsResult;
use dlms_transport::Media;

/// Width of the progress scale
pub const PROGRESS_SCALE: usize = 80;

/// Monotonic progress on the 0..=80 scale
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    max: usize,
    last: usize,
}

impl ProgressTracker {
    pub fn new(max: usize) -> Self {
        Self { max, last: 0 }
    }

    /// Whether the payload is large enough to report progress at all
    pub fn is_reported(&self) -> bool {
        self.max > 1
    }

    /// Move to `current` elements received
    ///
    /// # Returns
    ///
    /// An event when the scaled value grew, `None` otherwise.
    pub fn advance(&mut self, current: usize, marker: ProgressMarker) -> Option<ProgressEvent> {
        if !self.is_reported() {
            return None;
        }
        let scaled = (current.saturating_mul(PROGRESS_SCALE) / self.max).min(PROGRESS_SCALE);
        if scaled <= self.last {
            return None;
        }
        let event = ProgressEvent {
            marker,
            from: self.last,
            to: scaled,
        };
        self.last = scaled;
        Some(event)
    }
}

/// Exchange `request` and collect the whole reply payload
///
/// An empty request returns an empty payload without touching the
/// transport.
pub async fn read_data_block<M, E>(
    exchanger: &mut PacketExchanger<M>,
    engine: &mut E,
    request: &[u8],
) -> DlmsResult<Vec<u8>>
where
    M: Media,
    E: ProtocolEngine + ?Sized,
{
    if request.is_empty() {
        return Ok(Vec::new());
    }

    let reply = exchanger.exchange(&*engine, request).await?;
    let mut data = BytesMut::new();
    let first = engine.get_data_from_packet(&reply, &mut data)?;
    let mut more = first.more;
    let mut progress = ProgressTracker::new(first.max_progress);

    while !more.is_empty() {
        while more.contains(RequestType::Frame) {
            let request = engine.receiver_ready(RequestType::Frame)?;
            let reply = exchanger.exchange(&*engine, &request).await?;
            let step = engine.get_data_from_packet(&reply, &mut data)?;
            if let Some(event) = progress.advance(step.current_progress, ProgressMarker::Frame) {
                exchanger.progress(event);
            }
            if !step.more.contains(RequestType::Frame) {
                more.remove(RequestType::Frame);
                break;
            }
        }

        if more.contains(RequestType::Datablock) {
            let request = engine.receiver_ready(RequestType::Datablock)?;
            let reply = exchanger.exchange(&*engine, &request).await?;
            let step = engine.get_data_from_packet(&reply, &mut data)?;
            more = step.more;
            if let Some(event) = progress.advance(step.current_progress, ProgressMarker::Datablock)
            {
                exchanger.progress(event);
            }
        }
    }

    if progress.is_reported() {
        exchanger.progress_done();
    }
    Ok(data.to_vec())
}
