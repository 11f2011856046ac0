// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Transport abstraction module
//!
//! The uplink itself is an external collaborator. This module fixes the
//! contract the orchestrator consumes and provides in-memory links for
//! tests and simulation.

use crate::error::{LinkError, LinkErrorCode, LinkResult};
use crate::recovery::{with_retry, RetryStrategy};
use std::collections::VecDeque;
use std::time::Duration;

/// Statistics about link usage
#[derive(Debug, Clone, Default)]
pub struct ChannelMetrics {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Send attempts that failed
    pub send_failures: u64,
}

/// Trait for uplink transports
///
/// Every call reports success or a [`LinkError`] carrying an error code
/// and message; implementations never panic on link faults.
pub trait Transport {
    /// Open the link
    fn connect(&mut self) -> LinkResult<()>;

    /// Send one message, retrying up to `retries` additional times
    fn send(&mut self, message: &[u8], retries: u32) -> LinkResult<()>;

    /// Collect inbound messages until `timeout` elapses
    fn receive(&mut self, timeout: Duration) -> LinkResult<Vec<Vec<u8>>>;

    /// Close the link
    fn close(&mut self) -> LinkResult<()>;

    /// Get link metrics
    fn metrics(&self) -> ChannelMetrics;
}

fn not_connected() -> LinkError {
    LinkError::new(LinkErrorCode::NotConnected, "link is not connected")
}

/// An in-memory loopback link for testing
///
/// Sent messages are kept for inspection, inbound messages are scripted
/// with [`MemoryChannel::push_incoming`]. Failures can be injected for
/// connect and for a number of send attempts.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    /// Delivered messages
    tx_buffer: VecDeque<Vec<u8>>,
    /// Scripted inbound messages
    rx_buffer: VecDeque<Vec<u8>>,
    /// Whether the link is open
    is_open: bool,
    fail_connect: bool,
    failing_sends: u32,
    metrics: ChannelMetrics,
}

impl MemoryChannel {
    /// Create a new memory channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` fail
    pub fn fail_connect(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    /// Make the next `attempts` send attempts fail
    pub fn fail_sends(&mut self, attempts: u32) {
        self.failing_sends = attempts;
    }

    /// Queue a message for the next `receive`
    pub fn push_incoming(&mut self, message: Vec<u8>) {
        self.rx_buffer.push_back(message);
    }

    /// Take the oldest delivered message
    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.tx_buffer.pop_front()
    }

    /// Get number of delivered messages not yet popped
    pub fn pending_outgoing(&self) -> usize {
        self.tx_buffer.len()
    }

    /// Get number of scripted inbound messages
    pub fn pending_incoming(&self) -> usize {
        self.rx_buffer.len()
    }

    /// Whether the link is open
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    fn attempt_send(&mut self, message: &[u8]) -> LinkResult<()> {
        if self.failing_sends > 0 {
            self.failing_sends -= 1;
            self.metrics.send_failures += 1;
            return Err(LinkError::new(
                LinkErrorCode::SendFailed,
                "injected send failure",
            ));
        }
        self.tx_buffer.push_back(message.to_vec());
        self.metrics.bytes_sent += message.len() as u64;
        self.metrics.messages_sent += 1;
        Ok(())
    }
}

impl Transport for MemoryChannel {
    fn connect(&mut self) -> LinkResult<()> {
        if self.fail_connect {
            return Err(LinkError::new(
                LinkErrorCode::ConnectFailed,
                "injected connect failure",
            ));
        }
        self.is_open = true;
        Ok(())
    }

    fn send(&mut self, message: &[u8], retries: u32) -> LinkResult<()> {
        if !self.is_open {
            return Err(not_connected());
        }
        let strategy = RetryStrategy::fixed(retries, Duration::ZERO);
        with_retry(&strategy, || self.attempt_send(message))
    }

    fn receive(&mut self, _timeout: Duration) -> LinkResult<Vec<Vec<u8>>> {
        if !self.is_open {
            return Err(not_connected());
        }
        let messages: Vec<Vec<u8>> = self.rx_buffer.drain(..).collect();
        self.metrics.messages_received += messages.len() as u64;
        self.metrics.bytes_received += messages.iter().map(|m| m.len() as u64).sum::<u64>();
        Ok(messages)
    }

    fn close(&mut self) -> LinkResult<()> {
        self.is_open = false;
        Ok(())
    }

    fn metrics(&self) -> ChannelMetrics {
        self.metrics.clone()
    }
}

/// Lossy link that simulates dropped send attempts
///
/// Each attempt is dropped with probability `loss_rate` and reported as a
/// send failure, so retries get a chance to succeed.
#[derive(Debug)]
pub struct LossyChannel {
    inner: MemoryChannel,
    loss_rate: f32,
    rng_state: u64,
}

impl LossyChannel {
    /// Create a new lossy channel with given loss rate (0.0-1.0)
    pub fn new(loss_rate: f32) -> Self {
        Self {
            inner: MemoryChannel::new(),
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng_state: 12345,
        }
    }

    /// Access the underlying loopback
    pub fn inner_mut(&mut self) -> &mut MemoryChannel {
        &mut self.inner
    }

    /// Simple PRNG for deterministic testing
    fn next_random(&mut self) -> f32 {
        self.rng_state = self.rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.rng_state >> 16) & 0x7fff) as f32 / 32767.0
    }

    fn attempt_send(&mut self, message: &[u8]) -> LinkResult<()> {
        if self.next_random() < self.loss_rate {
            self.inner.metrics.send_failures += 1;
            return Err(LinkError::new(LinkErrorCode::SendFailed, "message lost"));
        }
        self.inner.attempt_send(message)
    }
}

impl Transport for LossyChannel {
    fn connect(&mut self) -> LinkResult<()> {
        self.inner.connect()
    }

    fn send(&mut self, message: &[u8], retries: u32) -> LinkResult<()> {
        if !self.inner.is_open {
            return Err(not_connected());
        }
        let strategy = RetryStrategy::fixed(retries, Duration::ZERO);
        with_retry(&strategy, || self.attempt_send(message))
    }

    fn receive(&mut self, timeout: Duration) -> LinkResult<Vec<Vec<u8>>> {
        self.inner.receive(timeout)
    }

    fn close(&mut self) -> LinkResult<()> {
        self.inner.close()
    }

    fn metrics(&self) -> ChannelMetrics {
        self.inner.metrics()
    }
}
