// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network path change detection by polling interface addresses.

use super::SupervisorEvent;
use std::collections::BTreeSet;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The usable (up, running, non-loopback) interface addresses at one
/// instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSnapshot {
	pub addresses: BTreeSet<(String, IpAddr)>,
}

impl PathSnapshot {
	pub fn describe_change(&self, next: &PathSnapshot) -> String {
		let gone: Vec<String> = self
			.addresses
			.difference(&next.addresses)
			.map(|(name, ip)| format!("-{name}/{ip}"))
			.collect();
		let added: Vec<String> = next
			.addresses
			.difference(&self.addresses)
			.map(|(name, ip)| format!("+{name}/{ip}"))
			.collect();
		gone.into_iter().chain(added).collect::<Vec<_>>().join(" ")
	}
}

pub trait PathSource: Send + Sync {
	fn snapshot(&self) -> io::Result<PathSnapshot>;
}

/// Reads the interface list with `getifaddrs(3)`.
#[derive(Debug, Default)]
pub struct InterfaceAddressSource;

#[cfg(unix)]
impl PathSource for InterfaceAddressSource {
	fn snapshot(&self) -> io::Result<PathSnapshot> {
		use std::ffi::CStr;
		use std::net::{Ipv4Addr, Ipv6Addr};

		let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
		// SAFETY: head receives a list freed below with freeifaddrs.
		if unsafe { libc::getifaddrs(&mut head) } != 0 {
			return Err(io::Error::last_os_error());
		}

		let wanted = (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_uint;
		let loopback = libc::IFF_LOOPBACK as libc::c_uint;
		let mut snapshot = PathSnapshot::default();
		let mut cur = head;

		while !cur.is_null() {
			// SAFETY: cur is a node of the list returned by getifaddrs.
			let ifa = unsafe { &*cur };
			cur = ifa.ifa_next;

			if ifa.ifa_addr.is_null()
				|| ifa.ifa_flags & wanted != wanted
				|| ifa.ifa_flags & loopback != 0
			{
				continue;
			}

			// SAFETY: ifa_name is a NUL-terminated string owned by the list.
			let name = unsafe { CStr::from_ptr(ifa.ifa_name) }
				.to_string_lossy()
				.into_owned();
			// SAFETY: ifa_addr is non-null; the family says how to read it.
			let family = i32::from(unsafe { (*ifa.ifa_addr).sa_family });

			let ip = if family == libc::AF_INET {
				// SAFETY: AF_INET addresses are sockaddr_in.
				let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
				IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)))
			} else if family == libc::AF_INET6 {
				// SAFETY: AF_INET6 addresses are sockaddr_in6.
				let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
				let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
				// Link-local addresses come and go without a path change.
				if ip.segments()[0] & 0xffc0 == 0xfe80 {
					continue;
				}
				IpAddr::V6(ip)
			} else {
				continue;
			};

			snapshot.addresses.insert((name, ip));
		}

		// SAFETY: head came from getifaddrs and is freed once.
		unsafe { libc::freeifaddrs(head) };
		Ok(snapshot)
	}
}

pub struct PathMonitor {
	source: Arc<dyn PathSource>,
	interval: Duration,
}

impl PathMonitor {
	pub fn new(source: Arc<dyn PathSource>, interval: Duration) -> Self {
		Self { source, interval }
	}

	pub fn spawn(
		self,
		events: mpsc::Sender<SupervisorEvent>,
		cancel: CancellationToken,
	) -> JoinHandle<()> {
		tokio::spawn(async move { self.run(events, cancel).await })
	}

	async fn run(self, events: mpsc::Sender<SupervisorEvent>, cancel: CancellationToken) {
		let mut last = match self.source.snapshot() {
			Ok(snapshot) => snapshot,
			Err(e) => {
				warn!(error = %e, "initial path snapshot failed");
				PathSnapshot::default()
			}
		};
		debug!(addresses = last.addresses.len(), "path monitor started");

		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		ticker.tick().await;

		loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => break,
				_ = ticker.tick() => {}
			}

			let next = match self.source.snapshot() {
				Ok(snapshot) => snapshot,
				Err(e) => {
					warn!(error = %e, "path snapshot failed");
					continue;
				}
			};
			if next == last {
				continue;
			}

			let description = last.describe_change(&next);
			info!(%description, "network path changed");
			last = next;

			if events
				.send(SupervisorEvent::PathChanged { description })
				.await
				.is_err()
			{
				break;
			}
		}
		debug!("path monitor stopped");
	}
}
