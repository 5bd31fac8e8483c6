//! Stream-scoped view of a connection.

use std::sync::Arc;

use super::TransportResult;
use super::conn::Conn;
use super::context::{OpContext, ReliableOptions};
use super::queue::PacketId;
use crate::core::StreamId;
use crate::message::Message;

/// A connection bound to one stream id.
///
/// Streams multiplex logical channels over a connection; reliable sequence
/// numbers stay per connection, so ordering holds across all streams.
#[derive(Debug, Clone)]
pub struct Stream {
    conn: Conn,
    id: StreamId,
}

impl Stream {
    pub(crate) fn new(conn: Conn, id: StreamId) -> Self {
        Self { conn, id }
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Underlying connection.
    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    /// See [`Conn::queue_reliable`].
    pub fn queue_reliable(
        &self,
        msgs: &[&dyn Message],
        opts: ReliableOptions,
    ) -> TransportResult<PacketId> {
        self.conn.queue_reliable(self.id, msgs, opts)
    }

    /// See [`Conn::queue_reliable_raw`].
    pub fn queue_reliable_raw(
        &self,
        payload: &[u8],
        opts: ReliableOptions,
    ) -> TransportResult<PacketId> {
        self.conn.queue_reliable_raw(self.id, payload, opts)
    }

    /// See [`Conn::send_reliable`].
    pub async fn send_reliable(&self, msgs: &[&dyn Message], ctx: OpContext) -> TransportResult<()> {
        self.conn.send_reliable(self.id, msgs, ctx).await
    }

    /// See [`Conn::send_unreliable`].
    pub fn send_unreliable(&self, msgs: &[&dyn Message]) -> TransportResult<()> {
        self.conn.send_unreliable(self.id, msgs)
    }

    /// Register a handler consulted first for messages on this stream.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Conn, StreamId, &dyn Message) -> bool + Send + Sync + 'static,
    {
        self.conn.push_stream_handler(self.id, Arc::new(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::STREAM_CONNECT;
    use crate::core::{Header, encode_packet};
    use crate::message::testing::{self, Tick};
    use crate::transport::{PacketConn, PipeConn, Port, PortConfig};
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_stream_sends_on_its_id() {
        let (a, b) = PipeConn::pair();
        let port = Port::new(a, Arc::new(testing::registry()), PortConfig::default());
        let stream = port
            .conn(b.local_addr().unwrap())
            .stream(STREAM_CONNECT)
            .unwrap();
        assert_eq!(stream.id(), STREAM_CONNECT);

        stream.send_unreliable(&[&Tick { n: 3 }]).unwrap();
        stream
            .queue_reliable(&[&Tick { n: 4 }], ReliableOptions::new())
            .unwrap();
        stream.conn().send_queue();

        let mut buf = [0u8; 64];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..2], &[STREAM_CONNECT, 0]);
        assert_eq!(n, 7);
        let (_, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..2], &[0x80 | STREAM_CONNECT, 0]);
    }

    #[tokio::test]
    async fn test_stream_handler_sees_only_its_stream() {
        let (a, b) = PipeConn::pair();
        let port = Port::new(a, Arc::new(testing::registry()), PortConfig::default());
        let conn = port.conn(b.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        conn.stream(9).unwrap().on_message(move |_, stream, _| {
            s.lock().push(stream);
            true
        });
        conn.on_message(|_, _, _| true);

        let tick = Tick { n: 1 }.encode_to_vec().unwrap();
        for stream in [9, 2, 9] {
            let mut d = encode_packet(Header::unreliable(stream, 0), &tick, 0);
            conn.handle_packet(&mut d);
        }
        assert_eq!(*seen.lock(), vec![9, 9]);
    }
}
