//! Meter reading client
//!
//! [`DlmsClient`] ties a transport, a protocol engine and a session
//! configuration together. It runs the bootstrap on [`connect`](DlmsClient::connect)
//! and routes every read through the block reassembly loop.

use crate::bootstrap::{Bootstrap, Handshake};
use crate::config::SessionConfig;
use crate::cosem::CosemEngine;
use crate::engine::{AttributeDescriptor, ProtocolEngine, SelectiveAccess};
use crate::exchange::PacketExchanger;
use crate::reassembly::read_data_block;
use crate::trace::TraceSink;
use chrono::NaiveDateTime;
use dlms_core::{CosemDateTime, DlmsResult};
use dlms_transport::Media;
use std::sync::Arc;

/// Result of one attribute in a bulk read, `None` when access was denied
pub type AttributeRead = (AttributeDescriptor, Option<Vec<u8>>);

pub struct DlmsClient<M, E = CosemEngine> {
    exchanger: PacketExchanger<M>,
    engine: E,
    config: SessionConfig,
    handshake: Option<Handshake>,
}

impl<M: Media> DlmsClient<M, CosemEngine> {
    /// Client with the COSEM engine built from `config`
    pub fn cosem(media: M, config: SessionConfig) -> DlmsResult<Self> {
        let engine = CosemEngine::new(&config)?;
        Ok(Self::new(media, engine, config))
    }
}

impl<M, E> DlmsClient<M, E>
where
    M: Media,
    E: ProtocolEngine,
{
    pub fn new(media: M, engine: E, config: SessionConfig) -> Self {
        let exchanger =
            PacketExchanger::new(media, config.wait_time).with_reply_size(config.reply_size);
        Self {
            exchanger,
            engine,
            config,
            handshake: None,
        }
    }

    pub fn with_trace(mut self, trace: Box<dyn TraceSink>) -> Self {
        self.exchanger = self.exchanger.with_trace(trace);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// What the bootstrap learned, once connected
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.handshake.is_some()
    }

    /// Open the transport and establish the association
    pub async fn connect(&mut self) -> DlmsResult<&Handshake> {
        let handshake = Bootstrap::new(&mut self.exchanger, &mut self.engine, &self.config)
            .run()
            .await?;
        match handshake.baud_rate() {
            Some(baud) => log::info!("connected at {} baud", baud),
            None => log::info!("connected"),
        }
        Ok(self.handshake.insert(handshake))
    }

    /// Read one attribute and return its A-XDR encoded value
    pub async fn read(&mut self, attribute: &AttributeDescriptor) -> DlmsResult<Vec<u8>> {
        self.read_selected(attribute, None).await
    }

    async fn read_selected(
        &mut self,
        attribute: &AttributeDescriptor,
        access: Option<&SelectiveAccess>,
    ) -> DlmsResult<Vec<u8>> {
        log::debug!("reading {}", attribute);
        let request = self.engine.read_request(attribute, access)?;
        read_data_block(&mut self.exchanger, &mut self.engine, &request).await
    }

    /// Read `count` rows of a profile buffer starting at row `from` (1-based)
    pub async fn read_rows_by_entry(
        &mut self,
        profile: &AttributeDescriptor,
        from: u32,
        count: u32,
    ) -> DlmsResult<Vec<u8>> {
        let access = SelectiveAccess::ByEntry { from, count };
        self.read_selected(profile, Some(&access)).await
    }

    /// Read the rows of a profile buffer whose `sort` column lies between `start` and `end`
    pub async fn read_rows_by_range(
        &mut self,
        profile: &AttributeDescriptor,
        sort: &AttributeDescriptor,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> DlmsResult<Vec<u8>> {
        let access = SelectiveAccess::ByRange {
            sort: *sort,
            start: CosemDateTime::from_naive(start)?,
            end: CosemDateTime::from_naive(end)?,
        };
        self.read_selected(profile, Some(&access)).await
    }

    /// Write an A-XDR encoded value
    pub async fn write(&mut self, attribute: &AttributeDescriptor, value: &[u8]) -> DlmsResult<()> {
        log::debug!("writing {}", attribute);
        let requests = self.engine.write_request(attribute, value)?;
        self.exchanger.exchange_all(&self.engine, &requests).await?;
        Ok(())
    }

    /// Read several attributes in order
    ///
    /// Attributes the meter denies access to are reported as `None` and the
    /// read continues. Any other error ends the bulk read.
    pub async fn read_attributes(
        &mut self,
        attributes: &[AttributeDescriptor],
    ) -> DlmsResult<Vec<AttributeRead>> {
        let mut values = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            match self.read(attribute).await {
                Ok(value) => values.push((*attribute, Some(value))),
                Err(e) if e.is_access_denied() => {
                    log::warn!("access to {} denied", attribute);
                    values.push((*attribute, None));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Disconnect from the meter and close the transport
    ///
    /// The disconnect request is best effort: a meter that does not answer
    /// it is logged and the transport is closed anyway.
    pub async fn close(&mut self) -> DlmsResult<()> {
        let shared = Arc::clone(self.exchanger.media());
        if !shared.lock().await.is_open() {
            return Ok(());
        }

        if self.handshake.take().is_some() {
            let sent = match self.engine.disconnect_request() {
                Ok(disconnect) => self.exchanger.exchange(&self.engine, &disconnect).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                log::warn!("disconnect failed: {}", e);
            }
        }
        shared.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InterfaceType;
    use crate::testing::{data_reply, error_reply, reply, CollectTrace, ScriptedEngine, ScriptedMedia};
    use chrono::NaiveDate;
    use dlms_core::{DlmsError, ObisCode};

    const REGISTER: AttributeDescriptor =
        AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);

    fn net_client(media: ScriptedMedia) -> DlmsClient<ScriptedMedia, ScriptedEngine> {
        let config = SessionConfig::default().with_interface(InterfaceType::Net);
        let engine = ScriptedEngine::default().with_interface(InterfaceType::Net);
        DlmsClient::new(media, engine, config)
    }

    /// Replies to both AARQ frames of the scripted engine
    fn associated(media: ScriptedMedia) -> ScriptedMedia {
        media.reply(reply(b"ok")).reply(reply(b"AARE"))
    }

    async fn sent(client: &DlmsClient<ScriptedMedia, ScriptedEngine>) -> Vec<Vec<u8>> {
        client.exchanger.media().lock().await.sent.clone()
    }

    #[tokio::test]
    async fn test_connect_and_read() {
        let media = associated(ScriptedMedia::network()).reply(data_reply(0, 1, 1, &[0x11, 0x05]));
        let mut client = net_client(media);

        assert!(!client.is_connected());
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.engine().parsed, vec!["AARE"]);

        assert_eq!(client.read(&REGISTER).await.unwrap(), vec![0x11, 0x05]);
        assert_eq!(sent(&client).await.last().unwrap(), b"GET\x02");
    }

    #[tokio::test]
    async fn test_bulk_read_skips_denied_attributes() {
        let media = associated(ScriptedMedia::network())
            .reply(error_reply(3))
            .reply(data_reply(0, 1, 1, &[0x11, 0x07]));
        let mut client = net_client(media);
        client.connect().await.unwrap();

        let scaler = AttributeDescriptor::new(3, REGISTER.obis, 3);
        let values = client.read_attributes(&[scaler, REGISTER]).await.unwrap();
        assert_eq!(values, vec![(scaler, None), (REGISTER, Some(vec![0x11, 0x07]))]);
    }

    #[tokio::test]
    async fn test_bulk_read_aborts_on_other_errors() {
        let media = associated(ScriptedMedia::network())
            .reply(error_reply(4))
            .reply(data_reply(0, 1, 1, &[0x11, 0x07]));
        let mut client = net_client(media);
        client.connect().await.unwrap();

        let err = client.read_attributes(&[REGISTER, REGISTER]).await.unwrap_err();
        assert!(matches!(err, DlmsError::Application(4)));
        // the second attribute was never requested
        assert_eq!(sent(&client).await.len(), 3);
    }

    #[tokio::test]
    async fn test_profile_rows_use_selective_access() {
        let media = associated(ScriptedMedia::network())
            .reply(data_reply(0, 1, 1, &[0x01, 0x00]))
            .reply(data_reply(0, 1, 1, &[0x01, 0x00]));
        let mut client = net_client(media);
        client.connect().await.unwrap();

        let profile = AttributeDescriptor::new(7, ObisCode::new(1, 0, 99, 1, 0, 255), 2);
        let clock = AttributeDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2);
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        client
            .read_rows_by_range(
                &profile,
                &clock,
                day.and_hms_opt(0, 0, 0).unwrap(),
                day.and_hms_opt(23, 59, 59).unwrap(),
            )
            .await
            .unwrap();
        client.read_rows_by_entry(&profile, 1, 1).await.unwrap();

        let sent = sent(&client).await;
        assert_eq!(sent[2], b"GET\x02S");
        assert_eq!(sent[3], b"GET\x02S");
    }

    #[tokio::test]
    async fn test_write_sends_value() {
        let media = associated(ScriptedMedia::network()).reply(reply(b"SET-OK"));
        let mut client = net_client(media);
        client.connect().await.unwrap();

        client.write(&REGISTER, &[0x11, 0x01]).await.unwrap();
        assert_eq!(sent(&client).await.last().unwrap(), b"SET\x02\x11\x01");
    }

    #[tokio::test]
    async fn test_close_disconnects_then_closes() {
        let trace = CollectTrace::default();
        let media = associated(ScriptedMedia::network()).reply(reply(b"UA"));
        let mut client = net_client(media).with_trace(Box::new(trace.clone()));
        client.connect().await.unwrap();

        client.close().await.unwrap();
        assert!(!client.is_connected());
        let media = client.exchanger.media().lock().await;
        assert_eq!(media.sent.last().unwrap(), b"DISC");
        assert_eq!(media.closed, 1);
        assert_eq!(trace.frames().len(), 6);
    }

    #[tokio::test]
    async fn test_close_survives_silent_meter() {
        let mut client = net_client(associated(ScriptedMedia::network()));
        client.connect().await.unwrap();

        client.close().await.unwrap();
        let media = client.exchanger.media().lock().await;
        assert_eq!(media.sent.iter().filter(|frame| frame.as_slice() == b"DISC").count(), 4);
        assert_eq!(media.closed, 1);
        assert!(!media.open);
    }

    #[tokio::test]
    async fn test_close_without_open_transport() {
        let mut client = net_client(ScriptedMedia::network());
        client.close().await.unwrap();
        let media = client.exchanger.media().lock().await;
        assert!(media.sent.is_empty());
        assert_eq!(media.closed, 0);
    }

    #[tokio::test]
    async fn test_close_when_disconnect_cannot_be_built() {
        let mut client = net_client(associated(ScriptedMedia::network()));
        client.connect().await.unwrap();
        client.engine.fail_disconnect = true;

        client.close().await.unwrap();
        let media = client.exchanger.media().lock().await;
        assert!(!media.sent.iter().any(|frame| frame.as_slice() == b"DISC"));
        assert_eq!(media.closed, 1);
        assert!(!media.open);
    }
}
