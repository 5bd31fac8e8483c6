//! Port configuration.

use std::time::Duration;

use crate::core::constants::{
    DEFAULT_ACK_COALESCE_LIMIT, DEFAULT_DELAYED_ACK, DEFAULT_RECV_BUFFER_SIZE,
    DEFAULT_RESEND_INTERVAL, DEFAULT_RESEND_RETRIES, DEFAULT_TICK_INTERVAL,
};

/// Timing and decoding parameters shared by every connection of a port.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Interval of the resend loop.
    pub tick_interval: Duration,

    /// Minimum spacing between transmissions of one reliable packet.
    pub resend_interval: Duration,

    /// Transmissions of a reliable packet before it times out.
    pub resend_retries: u32,

    /// Delay before a coalesced acknowledgement is flushed.
    pub delayed_ack: Duration,

    /// Accepted reliable packets that force an immediate acknowledgement.
    pub ack_coalesce_limit: u32,

    /// Acknowledge every accepted reliable packet immediately.
    pub fast_ack: bool,

    /// Size of the read loop's datagram buffer.
    pub recv_buffer_size: usize,

    /// Decode inbound messages with the server-to-client shapes.
    ///
    /// Set on client ports; server ports leave it false.
    pub from_server: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            resend_retries: DEFAULT_RESEND_RETRIES,
            delayed_ack: DEFAULT_DELAYED_ACK,
            ack_coalesce_limit: DEFAULT_ACK_COALESCE_LIMIT,
            fast_ack: false,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            from_server: false,
        }
    }
}

impl PortConfig {
    /// Lifetime of a reliable packet queued without a caller deadline:
    /// every retry spaced by the resend interval, plus one tick.
    pub fn default_reliable_timeout(&self) -> Duration {
        self.resend_interval * self.resend_retries + self.tick_interval
    }
}

/// Builder for [`PortConfig`].
#[derive(Debug, Default)]
pub struct PortConfigBuilder {
    config: PortConfig,
}

impl PortConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resend loop interval.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the retransmission spacing.
    pub fn resend_interval(mut self, interval: Duration) -> Self {
        self.config.resend_interval = interval;
        self
    }

    /// Set the number of transmissions before timeout.
    pub fn resend_retries(mut self, retries: u32) -> Self {
        self.config.resend_retries = retries.max(1);
        self
    }

    /// Set the delayed acknowledgement interval.
    pub fn delayed_ack(mut self, delay: Duration) -> Self {
        self.config.delayed_ack = delay;
        self
    }

    /// Set the acknowledgement coalescing limit.
    pub fn ack_coalesce_limit(mut self, limit: u32) -> Self {
        self.config.ack_coalesce_limit = limit.max(1);
        self
    }

    /// Acknowledge every reliable packet immediately.
    pub fn fast_ack(mut self, enabled: bool) -> Self {
        self.config.fast_ack = enabled;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Decode inbound traffic as sent by a server.
    pub fn from_server(mut self, from_server: bool) -> Self {
        self.config.from_server = from_server;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PortConfig {
        self.config
    }
}
