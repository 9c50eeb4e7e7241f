//! The per-connection state machine (handshake already done): fragment reassembly,
//! control-frame dispatch, and the close handshake. Replaces the teacher's draft
//! `WSConnection` (a `Stream` polling a single `TcpStream` with `read_exact` per field)
//! with `Connection<S, H>`, generic over the transport and an application-supplied
//! `Handler`, and parameterized by `Role` rather than one type per side of the
//! handshake — composition in place of the inheritance chain
//! (`Protocol` -> `WebSocketProtocol` -> `WebSocketClientProtocol`) in the Python source
//! this crate is descended from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::codec::{self, DecodeOutcome};
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode};

/// Which side of the handshake this connection played. Determines masking direction
/// (I5: clients mask outbound frames, servers never do) rather than a distinct type per
/// role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
}

enum FragState {
    Idle,
    Active {
        opcode: OpCode,
        buffer: Vec<u8>,
        utf8_validated: usize,
    },
}

/// Application callback surface. All methods run synchronously from inside
/// [`Connection::run`]'s receive loop; a handler that needs to do async work of its own
/// spawns a task from within the callback rather than the trait going async, since
/// nothing else in this crate's dependency stack pulls in `async-trait`.
pub trait Handler: Send {
    /// Invoked once when the connection reaches the `Open` phase.
    fn on_open(&mut self) {}

    /// Invoked once per fully reassembled application message. `opcode` is always
    /// `Text` or `Binary`. A `Some` return is sent back out immediately by `run()`'s
    /// loop — the direct path for request/reply handlers like an echo server. A handler
    /// that needs to send independently of message arrival (a heartbeat, a different
    /// task entirely) should instead use the `Sender` obtained from
    /// [`Connection::sender`] before `run()` is called.
    fn on_message(&mut self, payload: Vec<u8>, opcode: OpCode) -> Option<(Vec<u8>, OpCode)>;

    /// Invoked exactly once, however the connection ends: a clean close handshake, a
    /// protocol violation, or the transport dropping. `status` is the reserved
    /// local-only code 1006 when the close never reached the wire.
    fn on_close(&mut self, _status: u16, _reason: String) {}
}

/// A cloneable handle onto a connection's outbound half, independent of the
/// [`Connection`] that drives reads. Lets a handler (or any other task) send frames
/// concurrently with [`Connection::run`], mirroring the teacher's split reader/writer
/// design (`read.rs`/`write.rs`/`split.rs`), where a single `Arc<Mutex<_>>`-guarded
/// writer is shared between automatic control-frame replies and the application's own
/// sends.
pub struct Sender<S> {
    write_half: Arc<Mutex<WriteHalf<S>>>,
    role: Role,
    closed: Arc<AtomicBool>,
}

impl<S> Clone for Sender<S> {
    fn clone(&self) -> Self {
        Self {
            write_half: self.write_half.clone(),
            role: self.role,
            closed: self.closed.clone(),
        }
    }
}

impl<S: AsyncWrite + Unpin> Sender<S> {
    /// Sends one application message. Payloads larger than `max_frame_size` are
    /// pre-fragmented across a Text/Binary frame followed by Continuation frames,
    /// mirroring `send_large_data_fragmented` from the teacher's message layer (§4.4.3).
    pub async fn send(
        &self,
        payload: &[u8],
        opcode: OpCode,
        max_frame_size: usize,
    ) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mask = self.role == Role::Client;

        if payload.len() <= max_frame_size {
            return self.write_all(&codec::encode(true, opcode, payload, mask)).await;
        }

        let mut chunks = payload.chunks(max_frame_size.max(1)).peekable();
        let first = chunks.next().unwrap_or(&[]);
        let first_fin = chunks.peek().is_none();
        self.write_all(&codec::encode(first_fin, opcode, first, mask))
            .await?;

        while let Some(chunk) = chunks.next() {
            let fin = chunks.peek().is_none();
            self.write_all(&codec::encode(fin, OpCode::Continuation, chunk, mask))
                .await?;
        }
        Ok(())
    }

    /// Sends a Close frame with `status`/`reason` and marks this handle closed, so
    /// subsequent sends fail fast instead of writing to a half-closed socket.
    pub async fn close(&self, status: u16, reason: &str) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut payload = status.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        let mask = self.role == Role::Client;
        let wire = codec::encode(true, OpCode::Close, &payload, mask);
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&wire).await.ok();
        write_half.shutdown().await.ok();
        Ok(())
    }

    async fn write_all(&self, wire: &[u8]) -> Result<(), Error> {
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(wire).await?;
        Ok(())
    }
}

/// One MiB, the protocol-level cap on how much unconsumed data the receive buffer may
/// hold before the connection closes with 1009 (I1).
const MAX_RECV_BUFFER: usize = 1 << 20;

/// One MiB, the protocol-level cap on the fragment reassembly buffer (I2). Fixed and
/// independent of the configurable `max_message_size`, which only governs the size of a
/// fully reassembled message once it's handed to the handler.
const MAX_FRAG_BUFFER: usize = 1 << 20;

/// Drives a single WebSocket connection end to end: the receive loop, fragment
/// reassembly, control-frame replies, and the close handshake. Built by
/// [`crate::handshake::accept_async`] or [`crate::handshake::connect_async`] once the
/// HTTP upgrade has already completed.
pub struct Connection<S, H> {
    read_half: ReadHalf<S>,
    sender: Sender<S>,
    role: Role,
    config: WebSocketConfig,
    handler: H,
    recv_buffer: Vec<u8>,
    frag: FragState,
    phase: Phase,
}

enum Dispatch {
    Continue,
    Done,
}

impl<S, H> Connection<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    pub(crate) fn new(transport: S, role: Role, config: WebSocketConfig, mut handler: H) -> Self {
        let (read_half, write_half) = split(transport);
        let sender = Sender {
            write_half: Arc::new(Mutex::new(write_half)),
            role,
            closed: Arc::new(AtomicBool::new(false)),
        };
        handler.on_open();
        Self {
            read_half,
            sender,
            role,
            config,
            handler,
            recv_buffer: Vec::new(),
            frag: FragState::Idle,
            phase: Phase::Open,
        }
    }

    /// A cloneable outbound handle, usable from other tasks while [`run`](Self::run)
    /// drives this connection's reads.
    pub fn sender(&self) -> Sender<S> {
        self.sender.clone()
    }

    fn max_frame_size(&self) -> usize {
        self.config.max_frame_size.unwrap_or(usize::MAX)
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size.unwrap_or(usize::MAX)
    }

    /// Sends one application message (§4.4.3).
    pub async fn send(&self, payload: &[u8], opcode: OpCode) -> Result<(), Error> {
        self.sender.send(payload, opcode, self.max_frame_size()).await
    }

    /// Initiates a close handshake with the given status/reason.
    pub async fn close(&self, status: u16, reason: &str) -> Result<(), Error> {
        self.sender.close(status, reason).await
    }

    /// Drives the receive loop until the connection closes, invoking the handler as
    /// frames arrive. Protocol-level failures never surface as an `Err` here — they
    /// resolve internally into a close frame and an `on_close` call (§7); an `Err`
    /// means the transport itself failed in a way no close frame could be written for.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut read_buf = [0u8; 8192];
        loop {
            if self.phase == Phase::Closed {
                return Ok(());
            }

            let n = match self.read_half.read(&mut read_buf).await {
                Ok(0) => {
                    self.finish(None, String::new()).await;
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    self.finish(None, String::new()).await;
                    return Err(e.into());
                }
            };

            if self.recv_buffer.len() + n > MAX_RECV_BUFFER {
                self.fail(Error::BufferExceeded).await;
                return Ok(());
            }
            self.recv_buffer.extend_from_slice(&read_buf[..n]);

            loop {
                match codec::decode(&self.recv_buffer) {
                    Ok(DecodeOutcome::Incomplete) => break,
                    Ok(DecodeOutcome::FrameReady(frame, consumed)) => {
                        self.recv_buffer.drain(..consumed);
                        match self.dispatch(frame).await {
                            Ok(Dispatch::Continue) => continue,
                            Ok(Dispatch::Done) => return Ok(()),
                            Err(e) => {
                                self.fail(e).await;
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => {
                        self.fail(e).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Dispatch, Error> {
        let expected_masked = self.role == Role::Server;
        if frame.masked != expected_masked {
            return Err(Error::InvalidMaskingDirection);
        }

        if frame.opcode.is_control() {
            return self.dispatch_control(frame).await;
        }
        self.dispatch_data(frame).await
    }

    async fn dispatch_control(&mut self, frame: Frame) -> Result<Dispatch, Error> {
        match frame.opcode {
            OpCode::Ping => {
                self.sender
                    .send(&frame.payload, OpCode::Pong, self.max_frame_size())
                    .await
                    .ok();
                Ok(Dispatch::Continue)
            }
            OpCode::Pong => Ok(Dispatch::Continue),
            OpCode::Close => {
                let (status, reason) = parse_close_payload(&frame.payload)?;
                self.sender.close(status, &reason).await.ok();
                self.phase = Phase::Closed;
                self.handler.on_close(status, reason);
                Ok(Dispatch::Done)
            }
            _ => unreachable!("dispatch_control only sees control opcodes"),
        }
    }

    async fn dispatch_data(&mut self, frame: Frame) -> Result<Dispatch, Error> {
        match frame.opcode {
            OpCode::Continuation => {
                let max_message_size = self.max_message_size();
                let FragState::Active {
                    opcode,
                    buffer,
                    utf8_validated,
                } = &mut self.frag
                else {
                    return Err(Error::InvalidContinuationFrame);
                };
                let new_len = buffer.len() + frame.payload.len();
                if new_len > MAX_FRAG_BUFFER {
                    return Err(Error::BufferExceeded);
                }
                if new_len > max_message_size {
                    return Err(Error::MaxMessageSize);
                }
                buffer.extend_from_slice(&frame.payload);
                if *opcode == OpCode::Text {
                    *utf8_validated = validate_utf8_prefix(buffer, *utf8_validated, frame.fin)?;
                }

                if frame.fin {
                    let FragState::Active { opcode, buffer, .. } =
                        std::mem::replace(&mut self.frag, FragState::Idle)
                    else {
                        unreachable!("matched above");
                    };
                    let reply = self.handler.on_message(buffer, opcode);
                    self.reply_if_any(reply).await;
                }
                Ok(Dispatch::Continue)
            }
            OpCode::Text | OpCode::Binary => {
                if matches!(self.frag, FragState::Active { .. }) {
                    return Err(Error::InvalidFrameFragmentation);
                }
                if frame.payload.len() > self.max_message_size() {
                    return Err(Error::MaxMessageSize);
                }

                if frame.fin {
                    if frame.opcode == OpCode::Text {
                        std::str::from_utf8(&frame.payload).map_err(|_| Error::InvalidUtf8)?;
                    }
                    let reply = self.handler.on_message(frame.payload, frame.opcode);
                    self.reply_if_any(reply).await;
                } else {
                    if frame.payload.len() > MAX_FRAG_BUFFER {
                        return Err(Error::BufferExceeded);
                    }
                    let utf8_validated = if frame.opcode == OpCode::Text {
                        validate_utf8_prefix(&frame.payload, 0, false)?
                    } else {
                        0
                    };
                    self.frag = FragState::Active {
                        opcode: frame.opcode,
                        buffer: frame.payload,
                        utf8_validated,
                    };
                }
                Ok(Dispatch::Continue)
            }
            _ => unreachable!("dispatch_data only sees data opcodes"),
        }
    }

    async fn reply_if_any(&self, reply: Option<(Vec<u8>, OpCode)>) {
        if let Some((payload, opcode)) = reply {
            self.sender
                .send(&payload, opcode, self.max_frame_size())
                .await
                .ok();
        }
    }

    /// A protocol-level failure: write a Close frame carrying the mapped status (if
    /// any), tear down, and notify the handler. Every internal error resolves to a
    /// close code before reaching the application, per the Error Handling Design table.
    async fn fail(&mut self, error: Error) {
        let status = error.close_code();
        self.finish(status, error.to_string()).await;
    }

    async fn finish(&mut self, status: Option<u16>, reason: String) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        if let Some(code) = status {
            self.sender.close(code, &reason).await.ok();
            self.handler.on_close(code, reason);
        } else {
            // Below-protocol failure (raw I/O, or the peer just dropped the socket): no
            // close frame can be written. 1006 is the reserved local-only code for this
            // and must never be put on the wire.
            self.handler.on_close(1006, reason);
        }
    }
}

/// Re-validates the not-yet-checked tail of `buffer` as UTF-8, returning how many bytes
/// are now confirmed valid. An incomplete multi-byte sequence at the end is tolerated
/// unless `is_final` (the last fragment of the message), per the streaming contract in
/// §4.4.2.
fn validate_utf8_prefix(
    buffer: &[u8],
    already_validated: usize,
    is_final: bool,
) -> Result<usize, Error> {
    match std::str::from_utf8(&buffer[already_validated..]) {
        Ok(s) => Ok(already_validated + s.len()),
        Err(e) => match e.error_len() {
            None if !is_final => Ok(already_validated + e.valid_up_to()),
            _ => Err(Error::InvalidUtf8),
        },
    }
}

const VALID_CLOSE_CODES_BELOW_3000: [u16; 9] = [1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011];

fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), Error> {
    if payload.is_empty() {
        return Ok((1000, String::new()));
    }
    // codec::decode already rejects length-1 Close payloads; this is a second line of
    // defense in case parse_close_payload is ever called directly.
    if payload.len() < 2 {
        return Err(Error::InvalidCloseFramePayload);
    }
    let raw_status = u16::from_be_bytes([payload[0], payload[1]]);
    let status = if VALID_CLOSE_CODES_BELOW_3000.contains(&raw_status)
        || (3000..5000).contains(&raw_status)
    {
        raw_status
    } else {
        1002
    };
    let reason = String::from_utf8(payload[2..].to_vec()).map_err(|_| Error::InvalidUtf8)?;
    Ok((status, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_close_payload_defaults_to_1000() {
        let (status, reason) = parse_close_payload(&[]).unwrap();
        assert_eq!(status, 1000);
        assert!(reason.is_empty());
    }

    #[test]
    fn out_of_range_close_status_remaps_to_1002() {
        let mut payload = 1005u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"nope");
        let (status, _) = parse_close_payload(&payload).unwrap();
        assert_eq!(status, 1002);
    }

    #[test]
    fn private_use_close_range_is_accepted() {
        let payload = 4100u16.to_be_bytes().to_vec();
        let (status, _) = parse_close_payload(&payload).unwrap();
        assert_eq!(status, 4100);
    }

    #[test]
    fn non_utf8_close_reason_is_rejected() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            parse_close_payload(&payload),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn utf8_prefix_tolerates_a_split_multibyte_sequence() {
        let bytes = "h\u{e9}".as_bytes(); // 'h' + 2-byte e-acute, split mid-sequence
        let (first, second) = bytes.split_at(2); // splits inside the 2-byte sequence
        let validated = validate_utf8_prefix(first, 0, false).unwrap();
        assert_eq!(validated, 1); // only the leading 'h' is confirmed so far

        let mut full = first.to_vec();
        full.extend_from_slice(second);
        let validated = validate_utf8_prefix(&full, validated, true).unwrap();
        assert_eq!(validated, full.len());
    }

    #[test]
    fn utf8_prefix_rejects_genuinely_invalid_bytes() {
        assert!(validate_utf8_prefix(&[0xFF, 0xFE], 0, true).is_err());
    }

    struct CaptureClose {
        tx: Option<tokio::sync::oneshot::Sender<u16>>,
    }

    impl Handler for CaptureClose {
        fn on_message(&mut self, _payload: Vec<u8>, _opcode: OpCode) -> Option<(Vec<u8>, OpCode)> {
            None
        }

        fn on_close(&mut self, status: u16, _reason: String) {
            if let Some(tx) = self.tx.take() {
                tx.send(status).ok();
            }
        }
    }

    #[tokio::test]
    async fn fragment_buffer_is_capped_at_one_mib_regardless_of_max_message_size() {
        use tokio::io::duplex;
        use tokio::sync::oneshot;

        let (mut test_side, conn_side) = duplex(2 << 20);
        let (tx, rx) = oneshot::channel();
        let handler = CaptureClose { tx: Some(tx) };
        // The default max_message_size is 64 MiB, far above the fixed 1 MiB frag cap;
        // the cap must fire anyway.
        let config = WebSocketConfig::default();
        let connection = Connection::new(conn_side, Role::Server, config, handler);
        tokio::spawn(connection.run());

        let first = codec::encode(false, OpCode::Text, &vec![0u8; 100], true);
        let second = codec::encode(true, OpCode::Continuation, &vec![0u8; MAX_FRAG_BUFFER], true);
        test_side.write_all(&first).await.unwrap();
        test_side.write_all(&second).await.unwrap();

        let status = rx.await.unwrap();
        assert_eq!(status, 1009);
    }
}
