//! Connection bootstrap
//!
//! Opens the transport and walks the meter from a cold line to a ready
//! association:
//!
//! ```text
//! Idle -> TransportOpen -> [SignOnNegotiated -> ModeSwitched] -> LinkEstablished
//!      -> Associated -> [Authenticated] -> Ready
//! ```
//!
//! The bracketed states only occur for the IEC 62056-21 sign-on on serial
//! lines and for HLS authentication. The first failing transition ends the
//! bootstrap with its error.

use crate::config::SessionConfig;
use crate::engine::ProtocolEngine;
use crate::exchange::PacketExchanger;
use crate::iec::{self, Identification, LINE_END, SIGN_ON_REQUEST};
use crate::trace::Direction;
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::{DataBits, Media, MediaKind, Parity, ReceiveParameters, SerialControl, StopBits};
use std::sync::Arc;

/// Reply buffer margin for flags, addresses, HCS and FCS around the information field
const FRAME_OVERHEAD: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    TransportOpen,
    SignOnNegotiated,
    ModeSwitched,
    LinkEstablished,
    Associated,
    Authenticated,
    Ready,
}

/// What the bootstrap learned about the meter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Identification from the sign-on reply
    pub identification: Option<Identification>,
    /// Largest information field the meter transmits
    pub max_info_tx: Option<usize>,
    pub authenticated: bool,
}

impl Handshake {
    pub fn baud_rate(&self) -> Option<u32> {
        self.identification.as_ref().map(|id| id.baud_rate)
    }
}

/// State machine establishing one connection
pub struct Bootstrap<'a, M, E: ?Sized> {
    exchanger: &'a mut PacketExchanger<M>,
    engine: &'a mut E,
    config: &'a SessionConfig,
    serial: bool,
    handshake: Handshake,
}

fn line_control(media: &mut dyn Media) -> DlmsResult<&mut dyn SerialControl> {
    media
        .serial_control()
        .ok_or_else(|| DlmsError::Protocol("Transport has no serial line control".to_string()))
}

impl<'a, M, E> Bootstrap<'a, M, E>
where
    M: Media,
    E: ProtocolEngine + ?Sized,
{
    pub fn new(
        exchanger: &'a mut PacketExchanger<M>,
        engine: &'a mut E,
        config: &'a SessionConfig,
    ) -> Self {
        Self {
            exchanger,
            engine,
            config,
            serial: false,
            handshake: Handshake::default(),
        }
    }

    /// Run every transition until `Ready`
    pub async fn run(mut self) -> DlmsResult<Handshake> {
        let mut state = BootstrapState::Idle;
        while state != BootstrapState::Ready {
            let next = self.step(state).await?;
            log::debug!("bootstrap {:?} -> {:?}", state, next);
            state = next;
        }
        Ok(self.handshake)
    }

    /// Perform the single transition out of `state`
    pub async fn step(&mut self, state: BootstrapState) -> DlmsResult<BootstrapState> {
        match state {
            BootstrapState::Idle => self.open_transport().await,
            BootstrapState::TransportOpen => {
                if self.serial && self.config.iec_sign_on {
                    self.sign_on().await
                } else {
                    self.connect_link().await
                }
            }
            BootstrapState::SignOnNegotiated => self.switch_mode().await,
            BootstrapState::ModeSwitched => self.connect_link().await,
            BootstrapState::LinkEstablished => self.associate().await,
            BootstrapState::Associated => {
                if self.engine.is_authentication_required() {
                    self.authenticate().await
                } else {
                    Ok(BootstrapState::Ready)
                }
            }
            BootstrapState::Authenticated | BootstrapState::Ready => Ok(BootstrapState::Ready),
        }
    }

    async fn open_transport(&mut self) -> DlmsResult<BootstrapState> {
        let shared = Arc::clone(self.exchanger.media());
        let mut media = shared.lock().await;
        media.open().await?;
        self.serial = media.kind() == MediaKind::Serial;
        if let Some(line) = media.serial_control() {
            line.set_dtr(true)?;
            line.set_rts(true)?;
        }
        Ok(BootstrapState::TransportOpen)
    }

    async fn sign_on(&mut self) -> DlmsResult<BootstrapState> {
        let shared = Arc::clone(self.exchanger.media());
        let mut media = shared.lock().await;
        let mut params = ReceiveParameters::new(Some(LINE_END), 1, self.exchanger.wait_time())
            .with_all_data(false);

        self.exchanger.record(Direction::Sent, SIGN_ON_REQUEST);
        media.send(SIGN_ON_REQUEST).await?;
        if !media.receive(&mut params).await? {
            return Err(DlmsError::TransportTimeout);
        }
        self.exchanger.record(Direction::Received, &params.reply);

        // Optical heads may echo the request
        if params.reply[..] == *SIGN_ON_REQUEST {
            params.clear_reply();
            if !media.receive(&mut params).await? {
                return Err(DlmsError::TransportTimeout);
            }
            self.exchanger.record(Direction::Received, &params.reply);
        }
        drop(media);

        let identification = iec::parse_identification(&params.reply, &self.config.manufacturer)?;
        log::info!("Bitrate is : {}", identification.baud_rate);
        self.handshake.identification = Some(identification);
        Ok(BootstrapState::SignOnNegotiated)
    }

    async fn switch_mode(&mut self) -> DlmsResult<BootstrapState> {
        let (baud_char, baud_rate) = match &self.handshake.identification {
            Some(id) => (id.baud_char, id.baud_rate),
            None => {
                return Err(DlmsError::Protocol(
                    "Mode switch requires a sign-on reply".to_string(),
                ))
            }
        };
        let request = iec::mode_switch_request(baud_char);

        let shared = Arc::clone(self.exchanger.media());
        let mut media = shared.lock().await;
        let mut params = ReceiveParameters::new(Some(LINE_END), 1, self.exchanger.wait_time())
            .with_all_data(false);

        media.send(&request).await?;
        self.exchanger.record(Direction::Sent, &request);
        // Required by IEC 62056-21 before the baud rate changes
        tokio::time::sleep(self.config.settle_delay).await;
        line_control(&mut *media)?.set_baud_rate(baud_rate)?;
        if !media.receive(&mut params).await? {
            return Err(DlmsError::TransportTimeout);
        }
        self.exchanger.record(Direction::Received, &params.reply);

        let line = line_control(&mut *media)?;
        line.set_dtr(false)?;
        line.set_rts(false)?;
        line.set_data_bits(DataBits::Eight)?;
        line.set_parity(Parity::None)?;
        line.set_stop_bits(StopBits::One)?;
        line.set_dtr(true)?;
        line.set_rts(true)?;
        Ok(BootstrapState::ModeSwitched)
    }

    async fn connect_link(&mut self) -> DlmsResult<BootstrapState> {
        if let Some(snrm) = self.engine.snrm_request()? {
            let reply = self.exchanger.exchange(&*self.engine, &snrm).await?;
            self.engine.parse_ua_response(&reply)?;
            if let Some(max_info_tx) = self.engine.max_info_tx() {
                self.exchanger.set_reply_size(max_info_tx + FRAME_OVERHEAD);
                self.handshake.max_info_tx = Some(max_info_tx);
            }
        }
        Ok(BootstrapState::LinkEstablished)
    }

    async fn associate(&mut self) -> DlmsResult<BootstrapState> {
        let requests = self.engine.aarq_request()?;
        let reply = self.exchanger.exchange_all(&*self.engine, &requests).await?;
        self.engine.parse_aare_response(&reply).map_err(|e| match e {
            DlmsError::AssociationRejected(_) => e,
            other => DlmsError::AssociationRejected(other.to_string()),
        })?;
        Ok(BootstrapState::Associated)
    }

    async fn authenticate(&mut self) -> DlmsResult<BootstrapState> {
        let requests = self.engine.application_association_request()?;
        let reply = self.exchanger.exchange_all(&*self.engine, &requests).await?;
        self.engine
            .parse_application_association_response(&reply)
            .map_err(|e| match e {
                DlmsError::AuthenticationFailed(_) => e,
                other => DlmsError::AuthenticationFailed(other.to_string()),
            })?;
        self.handshake.authenticated = true;
        Ok(BootstrapState::Authenticated)
    }
}
