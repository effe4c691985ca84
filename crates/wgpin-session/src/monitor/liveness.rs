// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic ICMP reachability probes.

use super::SupervisorEvent;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[async_trait]
pub trait LivenessProbe: Send + Sync {
	/// One round trip; the error describes why no reply arrived.
	async fn probe(&self) -> io::Result<Duration>;
}

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const PAYLOAD: &[u8] = b"wgpin-liveness";

/// Echo requests over an unprivileged datagram ICMP socket.
pub struct IcmpProbe {
	target: String,
	timeout: Duration,
	sequence: AtomicU16,
}

impl IcmpProbe {
	pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
		Self {
			target: target.into(),
			timeout,
			sequence: AtomicU16::new(0),
		}
	}

	async fn resolve(&self) -> io::Result<IpAddr> {
		if let Ok(ip) = self.target.parse::<IpAddr>() {
			return Ok(ip);
		}
		tokio::net::lookup_host((self.target.as_str(), 0))
			.await?
			.next()
			.map(|addr| addr.ip())
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "ping target did not resolve"))
	}
}

#[async_trait]
impl LivenessProbe for IcmpProbe {
	async fn probe(&self) -> io::Result<Duration> {
		let target = self.resolve().await?;
		let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
		let timeout = self.timeout;

		tokio::task::spawn_blocking(move || ping_once(target, sequence, timeout))
			.await
			.map_err(io::Error::other)?
	}
}

fn checksum(data: &[u8]) -> u16 {
	let mut sum: u32 = data
		.chunks(2)
		.map(|pair| match pair {
			[hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
			[hi] => u32::from(u16::from_be_bytes([*hi, 0])),
			_ => 0,
		})
		.sum();
	while sum >> 16 != 0 {
		sum = (sum & 0xffff) + (sum >> 16);
	}
	!(sum as u16)
}

pub(crate) fn echo_request(kind: u8, sequence: u16) -> Vec<u8> {
	let mut packet = vec![kind, 0, 0, 0, 0, 0];
	packet.extend_from_slice(&sequence.to_be_bytes());
	packet.extend_from_slice(PAYLOAD);
	if kind == ICMP_ECHO_REQUEST {
		let sum = checksum(&packet);
		packet[2..4].copy_from_slice(&sum.to_be_bytes());
	}
	packet
}

/// Returns the ICMP message inside `data`, skipping an IPv4 header when the
/// platform delivers one.
pub(crate) fn icmp_payload(data: &[u8], v4: bool) -> &[u8] {
	if v4 && data.first().is_some_and(|b| b >> 4 == 4) {
		let header_len = usize::from(data[0] & 0x0f) * 4;
		return data.get(header_len..).unwrap_or_default();
	}
	data
}

pub(crate) fn is_reply(icmp: &[u8], reply_kind: u8, sequence: u16) -> bool {
	icmp.len() >= 8 && icmp[0] == reply_kind && icmp[6..8] == sequence.to_be_bytes()
}

fn ping_once(target: IpAddr, sequence: u16, timeout: Duration) -> io::Result<Duration> {
	let (domain, protocol, request, reply) = match target {
		IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ICMP_ECHO_REQUEST, ICMP_ECHO_REPLY),
		IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ICMPV6_ECHO_REQUEST, ICMPV6_ECHO_REPLY),
	};

	let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
	socket.connect(&SockAddr::from(SocketAddr::new(target, 0)))?;

	let started = Instant::now();
	socket.send(&echo_request(request, sequence))?;

	let mut buf = [0u8; 1500];
	loop {
		let remaining = timeout.saturating_sub(started.elapsed());
		if remaining.is_zero() {
			return Err(io::Error::new(io::ErrorKind::TimedOut, "echo reply timed out"));
		}
		socket.set_read_timeout(Some(remaining))?;

		let n = match (&socket).read(&mut buf) {
			Ok(n) => n,
			Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
				return Err(io::Error::new(io::ErrorKind::TimedOut, "echo reply timed out"));
			}
			Err(e) => return Err(e),
		};

		if is_reply(icmp_payload(&buf[..n], target.is_ipv4()), reply, sequence) {
			return Ok(started.elapsed());
		}
		trace!(bytes = n, "ignoring unrelated icmp message");
	}
}

pub struct LivenessProber {
	probe: Arc<dyn LivenessProbe>,
	interval: Duration,
}

impl LivenessProber {
	pub fn new(probe: Arc<dyn LivenessProbe>, interval: Duration) -> Self {
		Self { probe, interval }
	}

	pub fn spawn(
		self,
		events: mpsc::Sender<SupervisorEvent>,
		cancel: CancellationToken,
	) -> JoinHandle<()> {
		tokio::spawn(async move { self.run(events, cancel).await })
	}

	async fn run(self, events: mpsc::Sender<SupervisorEvent>, cancel: CancellationToken) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			let result = tokio::select! {
				biased;

				_ = cancel.cancelled() => break,
				result = async {
					ticker.tick().await;
					self.probe.probe().await
				} => result,
			};

			let event = match result {
				Ok(rtt) => {
					trace!(rtt_ms = rtt.as_millis() as u64, "gateway reachable");
					SupervisorEvent::Reachable { rtt }
				}
				Err(e) => {
					debug!(error = %e, "liveness probe failed");
					SupervisorEvent::Unreachable {
						cause: e.to_string(),
					}
				}
			};

			if events.send(event).await.is_err() {
				break;
			}
		}
		debug!("liveness prober stopped");
	}
}
