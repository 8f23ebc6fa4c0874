//! DLMS/COSEM engine over HDLC or the IEC 62056-47 wrapper
//!
//! [`CosemEngine`] keeps the link and association state of one session:
//! HDLC sequence counters, the negotiated link parameters, the HLS
//! challenges and the position inside a segmented or block-wise reply.

pub mod acse;
pub mod axdr;
pub mod hls;
pub mod xdlms;

use crate::config::SessionConfig;
use crate::engine::{
    AttributeDescriptor, Authentication, DataProgress, InterfaceType, MoreData, ProtocolEngine,
    RequestType, SelectiveAccess,
};
use crate::objects;
use axdr::Value;
use bytes::BytesMut;
use dlms_core::{DlmsError, DlmsResult, ObisCode};
use dlms_session::wrapper;
use dlms_session::{FrameType, HdlcAddress, HdlcFrame, LinkParameters, LLC_REQUEST, LLC_RESPONSE};
use xdlms::Block;

/// Largest APDU the client accepts
pub const MAX_PDU_SIZE: u16 = 0xFFFF;

/// Engine for logical-name referencing meters
#[derive(Debug)]
pub struct CosemEngine {
    interface: InterfaceType,
    authentication: Authentication,
    password: Vec<u8>,
    client: HdlcAddress,
    server: HdlcAddress,
    client_port: u16,
    server_port: u16,
    send_seq: u8,
    recv_seq: u8,
    link: Option<LinkParameters>,
    max_pdu: Option<u16>,
    ctos: Vec<u8>,
    stoc: Vec<u8>,
    auth_required: bool,
    segment_pending: bool,
    block: Option<Block>,
}

impl CosemEngine {
    pub fn new(config: &SessionConfig) -> DlmsResult<Self> {
        let client = HdlcAddress::new(config.client_address)?;
        let server = match config.server.physical {
            Some(physical) => HdlcAddress::new_with_physical(config.server.logical, physical)?,
            None => HdlcAddress::new(config.server.logical)?,
        };
        Ok(Self {
            interface: config.interface,
            authentication: config.authentication,
            password: config.password.as_bytes().to_vec(),
            client,
            server,
            client_port: config.client_address,
            server_port: config.server.logical,
            send_seq: 0,
            recv_seq: 0,
            link: None,
            max_pdu: None,
            ctos: Vec::new(),
            stoc: Vec::new(),
            auth_required: false,
            segment_pending: false,
            block: None,
        })
    }

    /// Link parameters accepted by the meter, after the UA
    pub fn link_parameters(&self) -> Option<LinkParameters> {
        self.link
    }

    /// Largest APDU the meter accepts, after the AARE
    pub fn max_pdu(&self) -> Option<u16> {
        self.max_pdu
    }

    fn reset_reply_state(&mut self) {
        self.segment_pending = false;
        self.block = None;
    }

    /// Frames carrying `apdu` to the meter
    fn information_frames(&mut self, apdu: &[u8]) -> DlmsResult<Vec<Vec<u8>>> {
        if self.interface == InterfaceType::Net {
            return Ok(vec![wrapper::wrap(self.client_port, self.server_port, apdu)?]);
        }

        let mut info = LLC_REQUEST.to_vec();
        info.extend_from_slice(apdu);
        let max_info = self.link.unwrap_or_default().max_info_rx.max(1) as usize;
        let segments = info.len().div_ceil(max_info);
        let mut frames = Vec::with_capacity(segments);
        for (i, chunk) in info.chunks(max_info).enumerate() {
            let control = FrameType::Information.to_control_byte(self.send_seq, self.recv_seq);
            self.send_seq = (self.send_seq + 1) & 0x07;
            let frame = HdlcFrame::new(self.server, self.client, control, chunk.to_vec())
                .segmented(i + 1 < segments);
            frames.push(frame.encode()?);
        }
        Ok(frames)
    }

    fn single_frame(&mut self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let mut frames = self.information_frames(apdu)?;
        match frames.len() {
            1 => Ok(frames.remove(0)),
            n => Err(DlmsError::Protocol(format!(
                "Request needs {} frames, the meter accepts one",
                n
            ))),
        }
    }

    /// Decode an HDLC reply and acknowledge its sequence number
    fn receive_frame(&mut self, reply: &[u8]) -> DlmsResult<HdlcFrame> {
        let (frame, _) = HdlcFrame::decode(reply)?;
        match frame.frame_type() {
            FrameType::Information => {
                if let Some(seq) = frame.send_sequence() {
                    self.recv_seq = (seq + 1) & 0x07;
                }
                Ok(frame)
            }
            FrameType::DisconnectMode => Err(DlmsError::Protocol(
                "Meter is in disconnected mode".to_string(),
            )),
            FrameType::FrameReject => Err(DlmsError::Protocol(
                "Meter rejected the frame".to_string(),
            )),
            _ => Ok(frame),
        }
    }

    /// APDU of a reply that fits one frame
    fn reply_apdu(&mut self, reply: &[u8]) -> DlmsResult<Vec<u8>> {
        match self.interface {
            InterfaceType::Hdlc => {
                let frame = self.receive_frame(reply)?;
                Ok(strip_llc(frame.information_field()).to_vec())
            }
            InterfaceType::Net => Ok(wrapper::unwrap(reply)?.1.to_vec()),
        }
    }
}

fn strip_llc(info: &[u8]) -> &[u8] {
    info.strip_prefix(&LLC_RESPONSE[..]).unwrap_or(info)
}

impl ProtocolEngine for CosemEngine {
    fn interface_type(&self) -> InterfaceType {
        self.interface
    }

    fn snrm_request(&mut self) -> DlmsResult<Option<Vec<u8>>> {
        self.send_seq = 0;
        self.recv_seq = 0;
        self.link = None;
        self.reset_reply_state();
        if self.interface == InterfaceType::Net {
            return Ok(None);
        }
        let control = FrameType::SetNormalResponseMode.to_control_byte(0, 0);
        let info = LinkParameters::default().encode();
        let frame = HdlcFrame::new(self.server, self.client, control, info);
        frame.encode().map(Some)
    }

    fn parse_ua_response(&mut self, reply: &[u8]) -> DlmsResult<()> {
        if self.interface == InterfaceType::Net {
            return Ok(());
        }
        let frame = self.receive_frame(reply)?;
        if frame.frame_type() != FrameType::UnnumberedAcknowledge {
            return Err(DlmsError::Protocol(format!(
                "Expected UA, got {:?}",
                frame.frame_type()
            )));
        }
        let params = LinkParameters::decode(frame.information_field())?;
        log::debug!(
            "link: max info tx {}, rx {}, window tx {}, rx {}",
            params.max_info_tx,
            params.max_info_rx,
            params.window_tx,
            params.window_rx
        );
        self.link = Some(params);
        Ok(())
    }

    fn max_info_tx(&self) -> Option<usize> {
        self.link.map(|params| params.max_info_tx as usize)
    }

    fn aarq_request(&mut self) -> DlmsResult<Vec<Vec<u8>>> {
        self.auth_required = false;
        self.stoc.clear();
        let calling_value = match self.authentication {
            Authentication::None => Vec::new(),
            Authentication::Low => self.password.clone(),
            Authentication::High => {
                self.ctos = hls::challenge();
                self.ctos.clone()
            }
        };
        let aarq = acse::encode_aarq(
            self.authentication,
            &calling_value,
            acse::DEFAULT_CONFORMANCE,
            MAX_PDU_SIZE,
        );
        self.information_frames(&aarq)
    }

    fn parse_aare_response(&mut self, reply: &[u8]) -> DlmsResult<()> {
        let apdu = self.reply_apdu(reply)?;
        let aare = acse::decode_aare(&apdu)?;
        if !aare.is_accepted() {
            return Err(DlmsError::AssociationRejected(match aare.initiate_error {
                Some(code) => format!("initiate error {}", code),
                None => format!("result {}, diagnostic {}", aare.result, aare.diagnostic),
            }));
        }
        self.max_pdu = aare.max_pdu;
        if self.authentication == Authentication::High && aare.needs_authentication() {
            self.stoc = aare.challenge.ok_or_else(|| {
                DlmsError::AssociationRejected("AARE carries no HLS challenge".to_string())
            })?;
            self.auth_required = true;
        }
        Ok(())
    }

    fn is_authentication_required(&self) -> bool {
        self.auth_required
    }

    fn application_association_request(&mut self) -> DlmsResult<Vec<Vec<u8>>> {
        let answer = xdlms::octet_string(&hls::answer(&self.password, &self.stoc));
        let action = xdlms::action_request(
            objects::ASSOCIATION_LN_CLASS,
            &ObisCode::CURRENT_ASSOCIATION,
            xdlms::REPLY_TO_HLS_AUTHENTICATION,
            Some(&answer),
        );
        self.information_frames(&action)
    }

    fn parse_application_association_response(&mut self, reply: &[u8]) -> DlmsResult<()> {
        let apdu = self.reply_apdu(reply)?;
        let data = xdlms::action_return_data(&apdu)?.ok_or_else(|| {
            DlmsError::AuthenticationFailed("Meter returned no challenge answer".to_string())
        })?;
        let expected = hls::answer(&self.password, &self.ctos);
        match Value::decode(data)? {
            Value::OctetString(answer) if answer == expected => {
                self.auth_required = false;
                Ok(())
            }
            _ => Err(DlmsError::AuthenticationFailed(
                "Meter answer to the client challenge is wrong".to_string(),
            )),
        }
    }

    fn disconnect_request(&mut self) -> DlmsResult<Vec<u8>> {
        match self.interface {
            InterfaceType::Hdlc => {
                let control = FrameType::Disconnect.to_control_byte(0, 0);
                HdlcFrame::new(self.server, self.client, control, Vec::new()).encode()
            }
            InterfaceType::Net => {
                wrapper::wrap(self.client_port, self.server_port, &acse::RELEASE_REQUEST)
            }
        }
    }

    fn read_request(
        &mut self,
        attribute: &AttributeDescriptor,
        access: Option<&SelectiveAccess>,
    ) -> DlmsResult<Vec<u8>> {
        self.reset_reply_state();
        self.single_frame(&xdlms::get_request(attribute, access))
    }

    fn write_request(
        &mut self,
        attribute: &AttributeDescriptor,
        value: &[u8],
    ) -> DlmsResult<Vec<Vec<u8>>> {
        self.reset_reply_state();
        self.information_frames(&xdlms::set_request(attribute, value))
    }

    fn receiver_ready(&mut self, kind: RequestType) -> DlmsResult<Vec<u8>> {
        match kind {
            RequestType::Frame => {
                if self.interface == InterfaceType::Net {
                    return Err(DlmsError::Protocol(
                        "Wrapper framing has no link-layer segments".to_string(),
                    ));
                }
                let control = FrameType::ReceiveReady.to_control_byte(0, self.recv_seq);
                HdlcFrame::new(self.server, self.client, control, Vec::new()).encode()
            }
            RequestType::Datablock => {
                let block = self.block.ok_or_else(|| {
                    DlmsError::Protocol("No datablock to acknowledge".to_string())
                })?;
                self.single_frame(&xdlms::get_next_request(block.number))
            }
        }
    }

    fn is_packet_complete(&self, reply: &[u8]) -> bool {
        match self.interface {
            InterfaceType::Hdlc => dlms_session::is_frame_complete(reply),
            InterfaceType::Net => wrapper::is_complete(reply),
        }
    }

    fn check_reply_errors(&self, _request: &[u8], reply: &[u8]) -> Vec<u8> {
        let code = match self.interface {
            InterfaceType::Hdlc => match HdlcFrame::decode(reply) {
                // Continuation segments carry no APDU header
                Ok((frame, _))
                    if frame.frame_type() == FrameType::Information && !self.segment_pending =>
                {
                    xdlms::response_error(strip_llc(frame.information_field()))
                }
                _ => None,
            },
            InterfaceType::Net => wrapper::unwrap(reply)
                .ok()
                .and_then(|(_, apdu)| xdlms::response_error(apdu)),
        };
        code.into_iter().collect()
    }

    fn get_data_from_packet(
        &mut self,
        reply: &[u8],
        data: &mut BytesMut,
    ) -> DlmsResult<DataProgress> {
        let continuation = self.segment_pending;
        let (payload, segmented) = match self.interface {
            InterfaceType::Hdlc => {
                let frame = self.receive_frame(reply)?;
                let segmented = frame.is_segmented();
                (frame.into_information_field(), segmented)
            }
            InterfaceType::Net => (wrapper::unwrap(reply)?.1.to_vec(), false),
        };
        self.segment_pending = segmented;

        if continuation {
            data.extend_from_slice(&payload);
        } else {
            let apdu = strip_llc(&payload);
            let header = xdlms::get_response_header(apdu)?;
            self.block = header.block;
            data.extend_from_slice(apdu.get(header.length..).unwrap_or_default());
        }

        let mut more = MoreData::none();
        if segmented {
            more.insert(RequestType::Frame);
        }
        if matches!(self.block, Some(block) if !block.last) {
            more.insert(RequestType::Datablock);
        }
        let (max_progress, current_progress) = axdr::progress(data);
        Ok(DataProgress {
            more,
            max_progress,
            current_progress,
        })
    }
}
