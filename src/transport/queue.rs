//! Reliable packet queue.
//!
//! Tracks reliable packets awaiting acknowledgement and decides when each one
//! is (re)transmitted, acknowledged or given up on.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::context::Callback;
use crate::core::{Header, StreamId, encode_packet, seq_before};

/// Process-unique handle of a queued reliable packet.
pub type PacketId = u64;

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_packet_id() -> PacketId {
    NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// A reliable packet in flight.
pub(crate) struct QueuedPacket {
    pub id: PacketId,
    pub stream: StreamId,
    pub seq: u8,
    /// Obfuscation key captured at enqueue; retransmissions reuse it.
    pub xor_key: u8,
    pub payload: Vec<u8>,
    pub last_send: Option<Instant>,
    pub transmissions: u32,
    /// Transmission cap; `None` retransmits until the deadline.
    pub max_transmissions: Option<u32>,
    pub deadline: Instant,
    pub cancel: CancellationToken,
    on_acked: Option<Callback>,
    on_timeout: Option<Callback>,
}

impl QueuedPacket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: StreamId,
        seq: u8,
        xor_key: u8,
        payload: Vec<u8>,
        deadline: Instant,
        max_transmissions: Option<u32>,
        cancel: CancellationToken,
        on_acked: Option<Callback>,
        on_timeout: Option<Callback>,
    ) -> Self {
        Self {
            id: next_packet_id(),
            stream,
            seq,
            xor_key,
            payload,
            last_send: None,
            transmissions: 0,
            max_transmissions,
            deadline,
            cancel,
            on_acked,
            on_timeout,
        }
    }

    /// Past its deadline or cancelled by the caller.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline || self.cancel.is_cancelled()
    }

    /// Needs a (re)transmission at `now`.
    pub fn is_due(&self, now: Instant, resend_interval: Duration) -> bool {
        if self
            .max_transmissions
            .is_some_and(|max| self.transmissions >= max)
        {
            return false;
        }
        self.last_send
            .is_none_or(|last| now.duration_since(last) >= resend_interval)
    }

    /// Encoded datagram; identical on every transmission.
    pub fn datagram(&self) -> Vec<u8> {
        encode_packet(
            Header::reliable(self.stream, self.seq),
            &self.payload,
            self.xor_key,
        )
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_send = Some(now);
        self.transmissions += 1;
    }

    /// Consume, running the acknowledgement callback.
    pub fn complete_acked(mut self) {
        self.on_timeout = None;
        if let Some(f) = self.on_acked.take() {
            f();
        }
    }

    /// Consume, running the timeout callback.
    pub fn complete_timeout(mut self) {
        self.on_acked = None;
        if let Some(f) = self.on_timeout.take() {
            f();
        }
    }
}

impl fmt::Debug for QueuedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedPacket")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("seq", &self.seq)
            .field("len", &self.payload.len())
            .field("transmissions", &self.transmissions)
            .finish()
    }
}

/// Ordered collection of in-flight reliable packets.
#[derive(Debug, Default)]
pub(crate) struct PacketQueue {
    packets: VecDeque<QueuedPacket>,
}

impl PacketQueue {
    pub fn push(&mut self, packet: QueuedPacket) {
        self.packets.push_back(packet);
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueuedPacket> {
        self.packets.iter_mut()
    }

    /// Remove a packet by identity without completing it.
    pub fn cancel(&mut self, id: PacketId) -> bool {
        let before = self.packets.len();
        self.packets.retain(|p| p.id != id);
        self.packets.len() != before
    }

    /// Remove and return packets past their deadline or cancelled.
    pub fn take_expired(&mut self, now: Instant) -> Vec<QueuedPacket> {
        self.take_where(|p| p.is_expired(now))
    }

    /// Remove and return packets covered by the peer's cumulative `ack`.
    ///
    /// `ack` is the next sequence the peer expects, so everything at or
    /// before `ack - 1` has been received.
    pub fn purge_acked(&mut self, ack: u8) -> Vec<QueuedPacket> {
        let last = ack.wrapping_sub(1);
        self.take_where(|p| seq_before(p.seq, last))
    }

    /// Drop every packet without completing it.
    pub fn clear(&mut self) -> usize {
        let n = self.packets.len();
        self.packets.clear();
        n
    }

    fn take_where<F>(&mut self, mut pred: F) -> Vec<QueuedPacket>
    where
        F: FnMut(&QueuedPacket) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.packets.len());
        for packet in self.packets.drain(..) {
            if pred(&packet) {
                taken.push(packet);
            } else {
                kept.push_back(packet);
            }
        }
        self.packets = kept;
        taken
    }
}
