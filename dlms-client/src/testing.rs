//! Scripted transport and engine for unit tests

use crate::engine::{
    AttributeDescriptor, DataProgress, InterfaceType, MoreData, ProtocolEngine, RequestType,
    SelectiveAccess,
};
use crate::trace::{Direction, ProgressEvent, TraceSink};
use async_trait::async_trait;
use bytes::BytesMut;
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::{
    DataBits, Media, MediaKind, Parity, ReceiveParameters, SerialControl, StopBits,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const FRAME: u8 = 0x01;
pub const DATABLOCK: u8 = 0x02;

const DATA_TAG: u8 = 0xDA;
const ERROR_TAG: u8 = 0xEE;

/// Reply frame of the scripted engine: length byte, then payload
pub fn reply(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![(payload.len() + 1) as u8];
    frame.extend_from_slice(payload);
    frame
}

/// Reply carrying `payload` with the given continuation flags and progress
pub fn data_reply(flags: u8, current: u8, max: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![DATA_TAG, flags, current, max];
    body.extend_from_slice(payload);
    reply(&body)
}

/// Reply reporting application error `code`
pub fn error_reply(code: u8) -> Vec<u8> {
    reply(&[ERROR_TAG, code])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRecord {
    pub eop: Option<u8>,
    pub count: usize,
    pub all_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Baud(u32),
    Dtr(bool),
    Rts(bool),
    DataBits(DataBits),
    Parity(Parity),
    StopBits(StopBits),
}

/// Transport that answers from a script
///
/// Each receive consumes one script entry: a chunk appended to the reply, or
/// silence. An exhausted script is silent.
pub struct ScriptedMedia {
    kind: MediaKind,
    script: VecDeque<Option<Vec<u8>>>,
    pub open: bool,
    pub opened: usize,
    pub closed: usize,
    pub sent: Vec<Vec<u8>>,
    pub sent_at: Vec<Instant>,
    pub receives: Vec<ReceiveRecord>,
    pub line: Vec<(Instant, LineEvent)>,
}

impl ScriptedMedia {
    fn with_kind(kind: MediaKind) -> Self {
        Self {
            kind,
            script: VecDeque::new(),
            open: false,
            opened: 0,
            closed: 0,
            sent: Vec::new(),
            sent_at: Vec::new(),
            receives: Vec::new(),
            line: Vec::new(),
        }
    }

    pub fn serial() -> Self {
        Self::with_kind(MediaKind::Serial)
    }

    pub fn network() -> Self {
        Self::with_kind(MediaKind::Network)
    }

    pub fn reply(mut self, chunk: Vec<u8>) -> Self {
        self.script.push_back(Some(chunk));
        self
    }

    pub fn silence(mut self, times: usize) -> Self {
        for _ in 0..times {
            self.script.push_back(None);
        }
        self
    }

    pub fn line_events(&self) -> Vec<LineEvent> {
        self.line.iter().map(|(_, event)| *event).collect()
    }

    fn line_event(&mut self, event: LineEvent) -> DlmsResult<()> {
        self.line.push((Instant::now(), event));
        Ok(())
    }
}

#[async_trait]
impl Media for ScriptedMedia {
    async fn open(&mut self) -> DlmsResult<()> {
        self.open = true;
        self.opened += 1;
        Ok(())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        self.open = false;
        self.closed += 1;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> DlmsResult<()> {
        self.sent.push(data.to_vec());
        self.sent_at.push(Instant::now());
        Ok(())
    }

    async fn receive(&mut self, params: &mut ReceiveParameters) -> DlmsResult<bool> {
        self.receives.push(ReceiveRecord {
            eop: params.eop,
            count: params.count,
            all_data: params.all_data,
        });
        match self.script.pop_front() {
            Some(Some(chunk)) => {
                params.reply.extend_from_slice(&chunk);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn serial_control(&mut self) -> Option<&mut dyn SerialControl> {
        match self.kind {
            MediaKind::Serial => Some(self),
            MediaKind::Network => None,
        }
    }
}

impl SerialControl for ScriptedMedia {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DlmsResult<()> {
        self.line_event(LineEvent::Baud(baud_rate))
    }

    fn set_dtr(&mut self, enable: bool) -> DlmsResult<()> {
        self.line_event(LineEvent::Dtr(enable))
    }

    fn set_rts(&mut self, enable: bool) -> DlmsResult<()> {
        self.line_event(LineEvent::Rts(enable))
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> DlmsResult<()> {
        self.line_event(LineEvent::DataBits(data_bits))
    }

    fn set_parity(&mut self, parity: Parity) -> DlmsResult<()> {
        self.line_event(LineEvent::Parity(parity))
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> DlmsResult<()> {
        self.line_event(LineEvent::StopBits(stop_bits))
    }
}

/// Engine whose frames are readable tags
///
/// Replies are `len payload...`, see [`reply`], [`data_reply`] and
/// [`error_reply`].
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    interface: InterfaceType,
    link_layer: bool,
    auth_required: bool,
    max_info_tx: Option<usize>,
    negotiated: bool,
    pub parsed: Vec<&'static str>,
    pub fail_disconnect: bool,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            interface: InterfaceType::Hdlc,
            link_layer: true,
            auth_required: false,
            max_info_tx: None,
            negotiated: false,
            parsed: Vec::new(),
            fail_disconnect: false,
        }
    }
}

impl ScriptedEngine {
    pub fn with_interface(mut self, interface: InterfaceType) -> Self {
        self.interface = interface;
        self.link_layer = interface == InterfaceType::Hdlc;
        self
    }

    pub fn with_authentication(mut self) -> Self {
        self.auth_required = true;
        self
    }

    pub fn with_max_info_tx(mut self, size: usize) -> Self {
        self.max_info_tx = Some(size);
        self
    }

    fn payload(reply: &[u8]) -> &[u8] {
        reply.get(1..).unwrap_or_default()
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn interface_type(&self) -> InterfaceType {
        self.interface
    }

    fn snrm_request(&mut self) -> DlmsResult<Option<Vec<u8>>> {
        Ok(self.link_layer.then(|| b"SNRM".to_vec()))
    }

    fn parse_ua_response(&mut self, _reply: &[u8]) -> DlmsResult<()> {
        self.parsed.push("UA");
        self.negotiated = true;
        Ok(())
    }

    fn max_info_tx(&self) -> Option<usize> {
        if self.negotiated {
            self.max_info_tx
        } else {
            None
        }
    }

    fn aarq_request(&mut self) -> DlmsResult<Vec<Vec<u8>>> {
        Ok(vec![b"AARQ1".to_vec(), b"AARQ2".to_vec()])
    }

    fn parse_aare_response(&mut self, reply: &[u8]) -> DlmsResult<()> {
        self.parsed.push("AARE");
        if Self::payload(reply) == b"REJECT" {
            return Err(DlmsError::Protocol("association result 1".to_string()));
        }
        Ok(())
    }

    fn is_authentication_required(&self) -> bool {
        self.auth_required
    }

    fn application_association_request(&mut self) -> DlmsResult<Vec<Vec<u8>>> {
        Ok(vec![b"HLS".to_vec()])
    }

    fn parse_application_association_response(&mut self, reply: &[u8]) -> DlmsResult<()> {
        self.parsed.push("HLS");
        if Self::payload(reply) == b"BAD" {
            return Err(DlmsError::Security("server answer mismatch".to_string()));
        }
        Ok(())
    }

    fn disconnect_request(&mut self) -> DlmsResult<Vec<u8>> {
        if self.fail_disconnect {
            return Err(DlmsError::Protocol("no link to release".to_string()));
        }
        Ok(b"DISC".to_vec())
    }

    fn read_request(
        &mut self,
        attribute: &AttributeDescriptor,
        access: Option<&SelectiveAccess>,
    ) -> DlmsResult<Vec<u8>> {
        let mut request = b"GET".to_vec();
        request.push(attribute.attribute as u8);
        if access.is_some() {
            request.push(b'S');
        }
        Ok(request)
    }

    fn write_request(
        &mut self,
        attribute: &AttributeDescriptor,
        value: &[u8],
    ) -> DlmsResult<Vec<Vec<u8>>> {
        let mut request = b"SET".to_vec();
        request.push(attribute.attribute as u8);
        request.extend_from_slice(value);
        Ok(vec![request])
    }

    fn receiver_ready(&mut self, kind: RequestType) -> DlmsResult<Vec<u8>> {
        Ok(match kind {
            RequestType::Frame => b"RR".to_vec(),
            RequestType::Datablock => b"NEXT".to_vec(),
        })
    }

    fn is_packet_complete(&self, reply: &[u8]) -> bool {
        match reply.first() {
            Some(&len) => reply.len() >= len as usize,
            None => false,
        }
    }

    fn check_reply_errors(&self, _request: &[u8], reply: &[u8]) -> Vec<u8> {
        match Self::payload(reply) {
            [ERROR_TAG, code, ..] => vec![*code],
            _ => Vec::new(),
        }
    }

    fn get_data_from_packet(
        &mut self,
        reply: &[u8],
        data: &mut BytesMut,
    ) -> DlmsResult<DataProgress> {
        match Self::payload(reply) {
            [DATA_TAG, flags, current, max, payload @ ..] => {
                data.extend_from_slice(payload);
                let mut more = MoreData::none();
                if flags & FRAME != 0 {
                    more.insert(RequestType::Frame);
                }
                if flags & DATABLOCK != 0 {
                    more.insert(RequestType::Datablock);
                }
                Ok(DataProgress {
                    more,
                    max_progress: *max as usize,
                    current_progress: *current as usize,
                })
            }
            _ => Err(DlmsError::InvalidData("not a data reply".to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct TraceLog {
    frames: Vec<(Direction, Vec<u8>)>,
    progress: Vec<ProgressEvent>,
    done: usize,
}

/// Trace sink that keeps everything for inspection
#[derive(Debug, Clone, Default)]
pub struct CollectTrace {
    log: Arc<Mutex<TraceLog>>,
}

impl CollectTrace {
    pub fn frames(&self) -> Vec<(Direction, Vec<u8>)> {
        self.log.lock().unwrap().frames.clone()
    }

    pub fn progress(&self) -> Vec<ProgressEvent> {
        self.log.lock().unwrap().progress.clone()
    }

    pub fn done(&self) -> usize {
        self.log.lock().unwrap().done
    }
}

impl TraceSink for CollectTrace {
    fn frame(&mut self, direction: Direction, _elapsed: Duration, frame: &[u8]) {
        self.log.lock().unwrap().frames.push((direction, frame.to_vec()));
    }

    fn progress(&mut self, event: ProgressEvent) {
        self.log.lock().unwrap().progress.push(event);
    }

    fn progress_done(&mut self) {
        self.log.lock().unwrap().done += 1;
    }
}
