// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! UDP uplink
//!
//! Messages are split into fixed-size CRC-checked packets, one datagram
//! each. Inbound datagrams are reassembled into messages.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use floatbot::recovery::{with_retry, RetryStrategy};
use floatbot::{
    ChannelMetrics, LinkError, LinkErrorCode, LinkResult, Packetizer, Reassembler, Transport,
};

use crate::config::LinkConfig;

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 2048;

/// Transport over a connected UDP socket
#[derive(Debug)]
pub struct UdpLink {
    config: LinkConfig,
    packetizer: Packetizer,
    socket: Option<UdpSocket>,
    reassembler: Reassembler,
    metrics: ChannelMetrics,
}

impl UdpLink {
    pub fn new(config: LinkConfig) -> LinkResult<Self> {
        let packetizer = Packetizer::new(config.packet_size)
            .map_err(|e| LinkError::new(LinkErrorCode::ConnectFailed, e.to_string()))?;
        Ok(Self {
            config,
            packetizer,
            socket: None,
            reassembler: Reassembler::new(),
            metrics: ChannelMetrics::default(),
        })
    }
}

fn not_connected() -> LinkError {
    LinkError::new(LinkErrorCode::NotConnected, "link is not connected")
}

impl Transport for UdpLink {
    fn connect(&mut self) -> LinkResult<()> {
        let connect_err =
            |e: std::io::Error| LinkError::new(LinkErrorCode::ConnectFailed, e.to_string());
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(connect_err)?;
        socket
            .connect((self.config.host.as_str(), self.config.port))
            .map_err(connect_err)?;
        socket
            .set_write_timeout(Some(Duration::from_millis(self.config.timeout_ms.max(1))))
            .map_err(connect_err)?;
        tracing::info!(
            "link open to {}:{} ({} byte packets)",
            self.config.host,
            self.config.port,
            self.config.packet_size
        );
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, message: &[u8], retries: u32) -> LinkResult<()> {
        let packets = self
            .packetizer
            .split(message)
            .map_err(|e| LinkError::new(LinkErrorCode::SendFailed, e.to_string()))?;
        let socket = self.socket.as_ref().ok_or_else(not_connected)?;
        let strategy = RetryStrategy::exponential(retries, RETRY_DELAY);

        let mut failures = 0;
        for packet in &packets {
            let bytes = packet.to_bytes();
            let result = with_retry(&strategy, || {
                socket.send(&bytes).map_err(|e| {
                    failures += 1;
                    LinkError::new(LinkErrorCode::SendFailed, e.to_string())
                })
            });
            if let Err(e) = result {
                self.metrics.send_failures += failures;
                return Err(e);
            }
            self.metrics.bytes_sent += bytes.len() as u64;
        }

        self.metrics.send_failures += failures;
        self.metrics.messages_sent += 1;
        tracing::debug!(
            "sent {} bytes in {} packets",
            message.len(),
            packets.len()
        );
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> LinkResult<Vec<Vec<u8>>> {
        let socket = self.socket.as_ref().ok_or_else(not_connected)?;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut messages = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| LinkError::new(LinkErrorCode::ReceiveFailed, e.to_string()))?;

            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => {
                    return Err(LinkError::new(LinkErrorCode::ReceiveFailed, e.to_string()));
                }
            };
            self.metrics.bytes_received += len as u64;

            match self.reassembler.push(&buf[..len]) {
                Ok(Some(message)) => {
                    self.metrics.messages_received += 1;
                    messages.push(message);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("dropping inbound packet: {}", e),
            }
        }

        if self.reassembler.pending() > 0 {
            tracing::debug!(
                "{} inbound messages incomplete at timeout",
                self.reassembler.pending()
            );
        }
        Ok(messages)
    }

    fn close(&mut self) -> LinkResult<()> {
        if self.socket.take().is_some() {
            tracing::debug!("link closed");
        }
        Ok(())
    }

    fn metrics(&self) -> ChannelMetrics {
        self.metrics.clone()
    }
}
