//! Per-peer connection: sequence counters, reliable queue and dispatch.
//!
//! One mutex guards every mutable field of a connection (counters, key, ack
//! scheduling, queue). Socket sends happen under that lock; they never block.
//! Completion callbacks and message handlers run after it is released, so they
//! may call back into the connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::context::{OpContext, ReliableOptions};
use super::handler::{Handler, HandlerList};
use super::port::PortShared;
use super::queue::{PacketId, PacketQueue, QueuedPacket};
use super::stream::Stream;
use super::TransportResult;
use crate::core::constants::{MAX_PAYLOAD_SIZE, MAX_STREAMS, SEQ_WINDOW, STREAM_GLOBAL};
use crate::core::{Header, StreamId, TransportError, decode_packet, encode_packet, seq_before};
use crate::message::{Message, encode_messages};

/// Counters of one connection's traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    /// Datagrams written to the socket.
    pub datagrams_sent: u64,
    /// Datagrams read from the socket.
    pub datagrams_received: u64,
    /// Reliable packets queued.
    pub reliable_queued: u64,
    /// Repeated transmissions of queued packets.
    pub retransmissions: u64,
    /// Reliable packets acknowledged by the peer.
    pub acked: u64,
    /// Reliable packets given up on.
    pub timed_out: u64,
    /// Reliable datagrams ahead of the expected sequence.
    pub out_of_order: u64,
    /// Reliable datagrams already received.
    pub duplicates: u64,
    /// Datagrams dropped as malformed.
    pub decode_errors: u64,
    /// Messages no handler accepted.
    pub unhandled: u64,
}

#[derive(Debug, Default)]
struct ConnState {
    xor_key: u8,
    send_seq: u8,
    recv_ack_seq: u8,
    pending_acks: u32,
    ack_deadline: Option<Instant>,
    queue: PacketQueue,
    stats: ConnStats,
}

struct ConnInner {
    addr: SocketAddr,
    port: Arc<PortShared>,
    state: Mutex<ConnState>,
    handlers: HandlerList,
    streams: [OnceLock<HandlerList>; MAX_STREAMS],
}

/// Connection to one remote address, owned by a [`Port`](super::Port).
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

pub(crate) fn check_stream(id: StreamId) -> TransportResult<()> {
    if id as usize >= MAX_STREAMS {
        return Err(TransportError::InvalidStream(id));
    }
    Ok(())
}

impl Conn {
    pub(crate) fn new(addr: SocketAddr, port: Arc<PortShared>) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                addr,
                port,
                state: Mutex::new(ConnState::default()),
                handlers: HandlerList::default(),
                streams: std::array::from_fn(|_| OnceLock::new()),
            }),
        }
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Current obfuscation key; 0 means disabled.
    pub fn xor_key(&self) -> u8 {
        self.inner.state.lock().xor_key
    }

    /// Set the obfuscation key agreed by the handshake.
    ///
    /// Applies to datagrams sent and received from now on; packets already
    /// queued keep the key they were queued with.
    pub fn set_xor_key(&self, key: u8) {
        self.inner.state.lock().xor_key = key;
        debug!(peer = %self.inner.addr, enabled = key != 0, "obfuscation key set");
    }

    /// Next reliable sequence number this side will assign.
    pub fn send_seq(&self) -> u8 {
        self.inner.state.lock().send_seq
    }

    /// Next reliable sequence number expected from the peer.
    pub fn recv_ack_seq(&self) -> u8 {
        self.inner.state.lock().recv_ack_seq
    }

    /// Reliable packets awaiting acknowledgement.
    pub fn pending_reliable(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Snapshot of traffic counters.
    pub fn stats(&self) -> ConnStats {
        self.inner.state.lock().stats
    }

    /// Reset sequence counters, key and ack state, dropping queued packets
    /// without running their callbacks.
    pub fn reset(&self) {
        let mut st = self.inner.state.lock();
        let dropped = st.queue.clear();
        let stats = st.stats;
        *st = ConnState {
            stats,
            ..ConnState::default()
        };
        debug!(peer = %self.inner.addr, dropped, "connection reset");
    }

    /// View scoped to stream `id`.
    pub fn stream(&self, id: StreamId) -> TransportResult<Stream> {
        check_stream(id)?;
        Ok(Stream::new(self.clone(), id))
    }

    /// Register a handler for messages on any stream of this connection.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Conn, StreamId, &dyn Message) -> bool + Send + Sync + 'static,
    {
        self.inner.handlers.push(Arc::new(handler));
    }

    pub(crate) fn push_stream_handler(&self, id: StreamId, handler: Handler) {
        self.inner.streams[id as usize]
            .get_or_init(HandlerList::default)
            .push(handler);
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.inner.port.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn transmit(&self, st: &mut ConnState, datagram: &[u8]) -> std::io::Result<()> {
        self.inner.port.socket.send_to(datagram, self.inner.addr)?;
        st.stats.datagrams_sent += 1;
        Ok(())
    }

    fn send_ack_locked(&self, st: &mut ConnState) -> std::io::Result<()> {
        let datagram = encode_packet(
            Header::unreliable(STREAM_GLOBAL, st.recv_ack_seq),
            &[],
            st.xor_key,
        );
        st.pending_acks = 0;
        st.ack_deadline = None;
        trace!(peer = %self.inner.addr, ack = st.recv_ack_seq, "ack ping");
        self.transmit(st, &datagram)
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Queue `msgs` as one reliable packet on `stream`.
    ///
    /// The first transmission happens on the next flush, so concurrent calls
    /// are batched into as few datagrams as possible.
    pub fn queue_reliable(
        &self,
        stream: StreamId,
        msgs: &[&dyn Message],
        opts: ReliableOptions,
    ) -> TransportResult<PacketId> {
        let payload = encode_messages(msgs)?;
        self.queue_reliable_raw(stream, &payload, opts)
    }

    /// Queue an already encoded payload as one reliable packet.
    pub fn queue_reliable_raw(
        &self,
        stream: StreamId,
        payload: &[u8],
        opts: ReliableOptions,
    ) -> TransportResult<PacketId> {
        check_stream(stream)?;
        self.ensure_open()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let config = &self.inner.port.config;
        let ReliableOptions {
            ctx,
            on_acked,
            on_timeout,
        } = opts;
        let (deadline, max_transmissions) = match ctx.deadline() {
            Some(deadline) => (deadline, None),
            None => (
                Instant::now() + config.default_reliable_timeout(),
                Some(config.resend_retries),
            ),
        };

        let mut st = self.inner.state.lock();
        if st.queue.len() >= SEQ_WINDOW as usize {
            return Err(TransportError::QueueFull {
                limit: SEQ_WINDOW as usize,
            });
        }
        let seq = st.send_seq;
        st.send_seq = seq.wrapping_add(1);

        let packet = QueuedPacket::new(
            stream,
            seq,
            st.xor_key,
            payload.to_vec(),
            deadline,
            max_transmissions,
            ctx.token().clone(),
            on_acked,
            on_timeout,
        );
        let id = packet.id;
        st.queue.push(packet);
        st.stats.reliable_queued += 1;
        trace!(peer = %self.inner.addr, stream, seq, id, "reliable packet queued");
        Ok(id)
    }

    /// Remove a queued packet without running its callbacks.
    ///
    /// Returns false if it already completed.
    pub fn cancel_reliable(&self, id: PacketId) -> bool {
        self.inner.state.lock().queue.cancel(id)
    }

    /// Send `msgs` reliably and wait for the acknowledgement.
    ///
    /// Fails with `Timeout` when the packet expires, `Cancelled` when `ctx` is
    /// cancelled first, and `Closed` when the port shuts down.
    pub async fn send_reliable(
        &self,
        stream: StreamId,
        msgs: &[&dyn Message],
        ctx: OpContext,
    ) -> TransportResult<()> {
        let (tx, mut rx) = oneshot::channel::<()>();
        let opts = ReliableOptions::new()
            .context(ctx.clone())
            .on_acked(move || {
                let _ = tx.send(());
            });
        let id = self.queue_reliable(stream, msgs, opts)?;
        self.send_queue();

        tokio::select! {
            res = &mut rx => match res {
                Ok(()) => Ok(()),
                // Sender dropped: the packet expired or was discarded.
                Err(_) => Err(self.failure_reason(&ctx)),
            },
            _ = ctx.done() => {
                if self.cancel_reliable(id) {
                    Err(self.failure_reason(&ctx))
                } else if rx.try_recv().is_ok() {
                    Ok(())
                } else {
                    Err(self.failure_reason(&ctx))
                }
            }
            _ = self.inner.port.closed.cancelled() => Err(TransportError::Closed),
        }
    }

    fn failure_reason(&self, ctx: &OpContext) -> TransportError {
        if self.inner.port.closed.is_cancelled() {
            TransportError::Closed
        } else if ctx.is_cancelled() {
            TransportError::Cancelled
        } else {
            TransportError::Timeout
        }
    }

    /// Send `msgs` once, piggybacking the current acknowledgement.
    pub fn send_unreliable(&self, stream: StreamId, msgs: &[&dyn Message]) -> TransportResult<()> {
        let payload = encode_messages(msgs)?;
        self.send_unreliable_raw(stream, &payload)
    }

    /// Send an already encoded payload once.
    pub fn send_unreliable_raw(&self, stream: StreamId, payload: &[u8]) -> TransportResult<()> {
        check_stream(stream)?;
        self.ensure_open()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut st = self.inner.state.lock();
        let datagram = encode_packet(
            Header::unreliable(stream, st.recv_ack_seq),
            payload,
            st.xor_key,
        );
        self.transmit(&mut st, &datagram)?;
        st.pending_acks = 0;
        st.ack_deadline = None;
        Ok(())
    }

    /// Acknowledge now (`fast`) or schedule the delayed acknowledgement.
    pub fn send_ack(&self, fast: bool) -> TransportResult<()> {
        self.ensure_open()?;
        let mut st = self.inner.state.lock();
        if fast {
            self.send_ack_locked(&mut st)?;
        } else {
            st.ack_deadline = Some(Instant::now() + self.inner.port.config.delayed_ack);
        }
        Ok(())
    }

    /// Flush the reliable queue.
    ///
    /// Expires packets past their deadline (running their timeout callbacks),
    /// transmits packets not sent within the resend interval, then sends the
    /// delayed acknowledgement if it is due. Called on every port tick.
    pub fn send_queue(&self) {
        if self.inner.port.closed.is_cancelled() {
            return;
        }
        let config = &self.inner.port.config;
        let now = Instant::now();

        let expired = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;

            let expired = st.queue.take_expired(now);
            st.stats.timed_out += expired.len() as u64;

            let mut outgoing = Vec::new();
            for packet in st.queue.iter_mut() {
                if packet.is_due(now, config.resend_interval) {
                    if packet.transmissions > 0 {
                        st.stats.retransmissions += 1;
                    }
                    packet.mark_sent(now);
                    outgoing.push(packet.datagram());
                }
            }
            for datagram in &outgoing {
                if let Err(e) = self.transmit(st, datagram) {
                    warn!(peer = %self.inner.addr, error = %e, "reliable transmission failed");
                    break;
                }
            }

            if st.ack_deadline.is_some_and(|d| now >= d) {
                if let Err(e) = self.send_ack_locked(st) {
                    warn!(peer = %self.inner.addr, error = %e, "delayed ack failed");
                }
            }
            expired
        };

        for packet in expired {
            debug!(
                peer = %self.inner.addr,
                id = packet.id,
                seq = packet.seq,
                transmissions = packet.transmissions,
                "reliable packet expired"
            );
            packet.complete_timeout();
        }
    }

    /// Drop queued packets on port shutdown.
    pub(crate) fn discard_queue(&self) -> usize {
        let mut st = self.inner.state.lock();
        st.ack_deadline = None;
        st.queue.clear()
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Process one inbound datagram from this connection's peer.
    pub(crate) fn handle_packet(&self, datagram: &mut [u8]) {
        let config = &self.inner.port.config;
        let addr = self.inner.addr;

        let (stream, payload, acked) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            st.stats.datagrams_received += 1;

            let (header, payload) = match decode_packet(datagram, st.xor_key) {
                Ok(parts) => parts,
                Err(e) => {
                    st.stats.decode_errors += 1;
                    debug!(peer = %addr, error = %e, "malformed datagram dropped");
                    return;
                }
            };

            let mut acked = Vec::new();
            if header.reliable {
                if header.seq != st.recv_ack_seq {
                    if seq_before(header.seq, st.recv_ack_seq.wrapping_sub(1)) {
                        // Our ack was lost; make sure the peer hears it again.
                        st.stats.duplicates += 1;
                        if st.ack_deadline.is_none() {
                            st.ack_deadline = Some(Instant::now() + config.delayed_ack);
                        }
                        trace!(peer = %addr, seq = header.seq, "duplicate reliable datagram dropped");
                    } else {
                        st.stats.out_of_order += 1;
                        trace!(
                            peer = %addr,
                            seq = header.seq,
                            expected = st.recv_ack_seq,
                            "out-of-order reliable datagram dropped"
                        );
                    }
                    return;
                }

                st.recv_ack_seq = st.recv_ack_seq.wrapping_add(1);
                st.pending_acks += 1;
                if config.fast_ack || st.pending_acks >= config.ack_coalesce_limit {
                    if let Err(e) = self.send_ack_locked(st) {
                        warn!(peer = %addr, error = %e, "ack failed");
                    }
                } else {
                    st.ack_deadline = Some(Instant::now() + config.delayed_ack);
                }
            } else {
                acked = st.queue.purge_acked(header.seq);
                st.stats.acked += acked.len() as u64;
            }
            (header.stream, payload, acked)
        };

        for packet in acked {
            trace!(peer = %addr, id = packet.id, seq = packet.seq, "reliable packet acked");
            packet.complete_acked();
        }

        if payload.is_empty() {
            return;
        }
        let msgs = match self
            .inner
            .port
            .registry
            .decode_all(payload, config.from_server)
        {
            Ok(msgs) => msgs,
            Err(e) => {
                self.inner.state.lock().stats.decode_errors += 1;
                debug!(peer = %addr, stream, error = %e, "undecodable payload dropped");
                return;
            }
        };
        for msg in &msgs {
            self.dispatch(stream, &**msg);
        }
    }

    fn dispatch(&self, stream: StreamId, msg: &dyn Message) {
        if let Some(list) = self.inner.streams[stream as usize].get() {
            if list.offer(self, stream, msg) {
                return;
            }
        }
        if self.inner.handlers.offer(self, stream, msg) {
            return;
        }
        if self.inner.port.handlers.offer(self, stream, msg) {
            return;
        }
        self.inner.state.lock().stats.unhandled += 1;
        debug!(
            peer = %self.inner.addr,
            stream,
            opcode = msg.opcode(),
            "unhandled message dropped"
        );
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("addr", &self.inner.addr)
            .finish_non_exhaustive()
    }
}
