//! Packet exchange engine
//!
//! Delivers one request frame and returns the matching reply frame. The
//! transport is locked for the whole send/receive round, so a connection
//! never has more than one exchange in flight.

use crate::engine::{InterfaceType, ProtocolEngine};
use crate::retry::{RetryBudget, MAX_RESENDS};
use crate::trace::{Direction, NoTrace, ProgressEvent, TraceSink};
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::{Media, MediaKind, ReceiveParameters};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// End-of-packet byte of HDLC frames
pub const HDLC_FLAG: u8 = 0x7E;

/// Shortest HDLC frame worth looking at (flag, format, address, control, flag)
const MIN_FRAME_LENGTH: usize = 5;

/// Reply buffer hint for HDLC before the link is negotiated
pub const HDLC_REPLY_SIZE: usize = 100;

/// Reply buffer hint for the wrapper (header plus one PDU)
pub const NET_REPLY_SIZE: usize = 8 + 1024;

/// Reliable request/response over a [`Media`]
pub struct PacketExchanger<M> {
    media: Arc<Mutex<M>>,
    trace: Box<dyn TraceSink>,
    wait_time: Duration,
    reply_size: usize,
    max_resends: u32,
    started: Instant,
}

impl<M: Media> PacketExchanger<M> {
    pub fn new(media: M, wait_time: Duration) -> Self {
        Self::with_shared_media(Arc::new(Mutex::new(media)), wait_time)
    }

    /// Exchanger over a transport that is also used outside of it
    pub fn with_shared_media(media: Arc<Mutex<M>>, wait_time: Duration) -> Self {
        Self {
            media,
            trace: Box::new(NoTrace),
            wait_time,
            reply_size: HDLC_REPLY_SIZE,
            max_resends: MAX_RESENDS,
            started: Instant::now(),
        }
    }

    pub fn with_trace(mut self, trace: Box<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_reply_size(mut self, reply_size: usize) -> Self {
        self.reply_size = reply_size;
        self
    }

    pub fn media(&self) -> &Arc<Mutex<M>> {
        &self.media
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn reply_size(&self) -> usize {
        self.reply_size
    }

    pub fn set_reply_size(&mut self, reply_size: usize) {
        log::debug!("reply buffer resized to {} bytes", reply_size);
        self.reply_size = reply_size;
    }

    /// Report a frame that was sent or received outside of [`exchange`](Self::exchange)
    pub fn record(&mut self, direction: Direction, frame: &[u8]) {
        self.trace.frame(direction, self.started.elapsed(), frame);
    }

    pub fn progress(&mut self, event: ProgressEvent) {
        self.trace.progress(event);
    }

    pub fn progress_done(&mut self) {
        self.trace.progress_done();
    }

    /// Send `request` and wait for its reply
    ///
    /// A request that gets no reply within the wait time is sent again, up
    /// to three times. An empty request is a no-op with an empty reply.
    ///
    /// # Errors
    ///
    /// * `TransportTimeout` when every send went unanswered, or when the rest
    ///   of a started reply did not arrive
    /// * `Application(code)` with the first error code the engine finds in
    ///   the reply
    pub async fn exchange<E>(&mut self, engine: &E, request: &[u8]) -> DlmsResult<Vec<u8>>
    where
        E: ProtocolEngine + ?Sized,
    {
        if request.is_empty() {
            return Ok(Vec::new());
        }

        let shared = Arc::clone(&self.media);
        let mut media = shared.lock().await;
        let eop = match (engine.interface_type(), media.kind()) {
            // Network transports deliver whole wrapper frames
            (InterfaceType::Net, MediaKind::Network) => None,
            _ => Some(HDLC_FLAG),
        };
        let count = if eop.is_some() { MIN_FRAME_LENGTH } else { 1 };
        let mut params =
            ReceiveParameters::new(eop, count, self.wait_time).with_capacity(self.reply_size);

        let mut budget = RetryBudget::new(self.max_resends);
        loop {
            self.record(Direction::Sent, request);
            media.send(request).await?;
            if media.receive(&mut params).await? {
                break;
            }
            let attempt = budget.consume()?;
            log::warn!(
                "Data send failed. Try to resend {}/{}",
                attempt,
                budget.max()
            );
        }

        // The terminator may also occur inside the payload
        while !engine.is_packet_complete(&params.reply) {
            if params.eop.is_none() {
                params.count = 1;
            }
            if !media.receive(&mut params).await? {
                return Err(DlmsError::TransportTimeout);
            }
        }
        drop(media);

        self.record(Direction::Received, &params.reply);
        let errors = engine.check_reply_errors(request, &params.reply);
        if let Some(&code) = errors.first() {
            log::debug!("reply carries application error {}", code);
            return Err(DlmsError::Application(code));
        }
        Ok(params.reply.to_vec())
    }

    /// Exchange every request in order and return the last reply
    pub async fn exchange_all<E>(&mut self, engine: &E, requests: &[Vec<u8>]) -> DlmsResult<Vec<u8>>
    where
        E: ProtocolEngine + ?Sized,
    {
        let mut reply = Vec::new();
        for request in requests {
            reply = self.exchange(engine, request).await?;
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{error_reply, reply, CollectTrace, ScriptedEngine, ScriptedMedia};

    fn exchanger(media: ScriptedMedia) -> PacketExchanger<ScriptedMedia> {
        PacketExchanger::new(media, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_reply_after_three_failures() {
        let media = ScriptedMedia::serial()
            .silence(3)
            .reply(reply(b"OK"));
        let mut exchanger = exchanger(media);
        let engine = ScriptedEngine::default();

        let answer = exchanger.exchange(&engine, b"GET").await.unwrap();
        assert_eq!(answer, reply(b"OK"));
        assert_eq!(exchanger.media().lock().await.sent.len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_after_four_sends() {
        let mut exchanger = exchanger(ScriptedMedia::serial().silence(10));
        let engine = ScriptedEngine::default();

        let err = exchanger.exchange(&engine, b"GET").await.unwrap_err();
        assert!(matches!(err, DlmsError::TransportTimeout));
        let media = exchanger.media().lock().await;
        assert_eq!(media.sent.len(), 4);
        assert!(media.sent.iter().all(|frame| frame == b"GET"));
    }

    #[tokio::test]
    async fn test_empty_request_is_noop() {
        let mut exchanger = exchanger(ScriptedMedia::serial());
        let engine = ScriptedEngine::default();
        assert!(exchanger.exchange(&engine, &[]).await.unwrap().is_empty());
        assert!(exchanger.media().lock().await.sent.is_empty());
    }

    #[tokio::test]
    async fn test_reply_completed_over_several_receives() {
        let full = reply(b"LONG REPLY");
        let media = ScriptedMedia::serial()
            .reply(full[..3].to_vec())
            .reply(full[3..7].to_vec())
            .reply(full[7..].to_vec());
        let mut exchanger = exchanger(media);
        let engine = ScriptedEngine::default();

        assert_eq!(exchanger.exchange(&engine, b"GET").await.unwrap(), full);
        assert_eq!(exchanger.media().lock().await.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_reply_times_out_without_resend() {
        let full = reply(b"LONG REPLY");
        let media = ScriptedMedia::serial().reply(full[..3].to_vec()).silence(1);
        let mut exchanger = exchanger(media);
        let engine = ScriptedEngine::default();

        let err = exchanger.exchange(&engine, b"GET").await.unwrap_err();
        assert!(matches!(err, DlmsError::TransportTimeout));
        assert_eq!(exchanger.media().lock().await.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_application_error_is_typed() {
        let mut exchanger = exchanger(ScriptedMedia::serial().reply(error_reply(3)));
        let engine = ScriptedEngine::default();

        let err = exchanger.exchange(&engine, b"GET").await.unwrap_err();
        assert!(err.is_access_denied());
    }

    #[tokio::test]
    async fn test_terminator_follows_interface_and_media() {
        let engine = ScriptedEngine::default().with_interface(InterfaceType::Net);

        let mut tcp = exchanger(ScriptedMedia::network().reply(reply(b"A")));
        tcp.exchange(&engine, b"GET").await.unwrap();
        let media = tcp.media().lock().await;
        assert_eq!(media.receives[0].eop, None);
        assert_eq!(media.receives[0].count, 1);
        drop(media);

        let mut serial = exchanger(ScriptedMedia::serial().reply(reply(b"A")));
        serial.exchange(&engine, b"GET").await.unwrap();
        let media = serial.media().lock().await;
        assert_eq!(media.receives[0].eop, Some(HDLC_FLAG));
        assert_eq!(media.receives[0].count, 5);
    }

    #[tokio::test]
    async fn test_frames_are_traced() {
        let trace = CollectTrace::default();
        let mut exchanger = exchanger(ScriptedMedia::serial().silence(1).reply(reply(b"OK")))
            .with_trace(Box::new(trace.clone()));
        let engine = ScriptedEngine::default();
        exchanger.exchange(&engine, b"GET").await.unwrap();

        let frames = trace.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], (Direction::Sent, b"GET".to_vec()));
        assert_eq!(frames[1], (Direction::Sent, b"GET".to_vec()));
        assert_eq!(frames[2], (Direction::Received, reply(b"OK")));
    }

    #[tokio::test]
    async fn test_exchange_all_returns_last_reply() {
        let media = ScriptedMedia::serial().reply(reply(b"1")).reply(reply(b"2"));
        let mut exchanger = exchanger(media);
        let engine = ScriptedEngine::default();
        let requests = vec![b"A".to_vec(), b"B".to_vec()];

        let last = exchanger.exchange_all(&engine, &requests).await.unwrap();
        assert_eq!(last, reply(b"2"));
        assert_eq!(exchanger.media().lock().await.sent, requests);
    }

    #[tokio::test]
    async fn test_resend_reply_excludes_partial_answer() {
        use dlms_transport::{TcpSettings, TcpTransport};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let full = reply(b"DATA\x7E");
        let answer = full.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 3];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&answer[..2]).await.unwrap();
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&answer).await.unwrap();
            socket
        });

        let mut transport = TcpTransport::new(TcpSettings::new("127.0.0.1", port));
        transport.open().await.unwrap();
        let mut exchanger = PacketExchanger::new(transport, Duration::from_millis(300));
        let engine = ScriptedEngine::default();

        assert_eq!(exchanger.exchange(&engine, b"GET").await.unwrap(), full);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_continuation_keeps_frame_minimum_with_terminator() {
        let full = reply(b"LONG REPLY");
        let media = ScriptedMedia::serial()
            .reply(full[..3].to_vec())
            .reply(full[3..].to_vec());
        let mut hdlc = exchanger(media);
        hdlc.exchange(&ScriptedEngine::default(), b"GET").await.unwrap();
        let counts: Vec<usize> =
            hdlc.media().lock().await.receives.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![5, 5]);

        let media = ScriptedMedia::network()
            .reply(full[..3].to_vec())
            .reply(full[3..].to_vec());
        let mut net = exchanger(media);
        let engine = ScriptedEngine::default().with_interface(InterfaceType::Net);
        net.exchange(&engine, b"GET").await.unwrap();
        let counts: Vec<usize> =
            net.media().lock().await.receives.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 1]);
    }
}
