//! Message types and port fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ludonet::message::{Message, Registry, WireReader, WireWriter};
use ludonet::transport::{PipeConn, Port, PortConfig};
use ludonet::{CodecError, Direction};
use tokio::sync::mpsc;

/// Numbered message used to check ordering.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Seq {
    pub n: u32,
}

impl Message for Seq {
    fn opcode(&self) -> u8 {
        0x10
    }

    fn encoded_size(&self) -> usize {
        5
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WireWriter::new(buf);
        w.put_u8(self.opcode())?;
        w.put_u32(self.n)?;
        Ok(w.written())
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        let mut r = WireReader::new(buf);
        r.expect_opcode(self.opcode())?;
        self.n = r.get_u32()?;
        Ok(r.consumed())
    }
}

pub const CHAT_NAME_WIDTH: usize = 16;

/// Chat line with a fixed-width sender name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Chat {
    pub from: String,
    pub text: String,
}

impl Message for Chat {
    fn opcode(&self) -> u8 {
        0x11
    }

    fn encoded_size(&self) -> usize {
        1 + CHAT_NAME_WIDTH + 2 + self.text.len()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WireWriter::new(buf);
        w.put_u8(self.opcode())?;
        w.put_fixed_str(&self.from, CHAT_NAME_WIDTH)?;
        w.put_blob(self.text.as_bytes())?;
        Ok(w.written())
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        let mut r = WireReader::new(buf);
        r.expect_opcode(self.opcode())?;
        self.from = r.get_fixed_str(CHAT_NAME_WIDTH)?;
        self.text = String::from_utf8_lossy(r.get_blob()?).into_owned();
        Ok(r.consumed())
    }
}

/// Message only the sending side knows about.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mystery;

impl Message for Mystery {
    fn opcode(&self) -> u8 {
        0x7F
    }

    fn encoded_size(&self) -> usize {
        1
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WireWriter::new(buf);
        w.put_u8(self.opcode())?;
        Ok(w.written())
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        let mut r = WireReader::new(buf);
        r.expect_opcode(self.opcode())?;
        Ok(r.consumed())
    }
}

pub fn registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry
        .register::<Seq>(Direction::Any)
        .register::<Chat>(Direction::Any);
    Arc::new(registry)
}

/// Client and server ports joined by an in-memory pipe; not started.
pub struct Link {
    pub client: Port,
    pub server: Port,
    pub client_sock: Arc<PipeConn>,
    pub server_sock: Arc<PipeConn>,
}

impl Link {
    pub fn new(config: PortConfig) -> Self {
        Self::with_registries(config, registry(), registry())
    }

    pub fn with_registries(
        config: PortConfig,
        client_registry: Arc<Registry>,
        server_registry: Arc<Registry>,
    ) -> Self {
        let (client_sock, server_sock) = PipeConn::pair();
        Self {
            client: Port::new(client_sock.clone(), client_registry, config.clone()),
            server: Port::new(server_sock.clone(), server_registry, config),
            client_sock,
            server_sock,
        }
    }

    pub fn start(&self) {
        self.client.start().unwrap();
        self.server.start().unwrap();
    }

    pub fn close(&self) {
        self.client.close().unwrap();
        self.server.close().unwrap();
    }
}

/// Forward every `Seq` the port receives into a channel.
pub fn collect_seq(port: &Port) -> mpsc::UnboundedReceiver<u32> {
    let (tx, rx) = mpsc::unbounded_channel();
    port.on_message(move |_, _, msg| match msg.downcast_ref::<Seq>() {
        Some(seq) => {
            let _ = tx.send(seq.n);
            true
        }
        None => false,
    });
    rx
}
