// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Discovery of the tunnel interface descriptor.
//!
//! Applying network settings makes the host create the virtual interface
//! somewhere in this process's descriptor table. [`InterfaceLocator`] finds
//! it with a bounded, ascending scan over `[0, DESCRIPTOR_SCAN_LIMIT)`; the
//! per-descriptor queries live behind [`DescriptorTable`] so each platform
//! supplies its own.

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod apple;
#[cfg(target_os = "linux")]
mod linux;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use apple::{create_interface as create_utun, ControlSocketTable};
#[cfg(target_os = "linux")]
pub use linux::{create_interface as create_tun, TunDeviceTable};

use crate::error::{Result, SessionError};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

pub const DESCRIPTOR_SCAN_LIMIT: RawFd = 1024;

/// Fallback name when the interface name cannot be read.
pub const UNKNOWN_INTERFACE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorProbe {
	/// Nothing open at this number.
	Closed,
	/// Open, but not a tunnel control descriptor.
	OtherFamily,
	/// A control descriptor; `id` is compared against the tunnel control id.
	Control { id: u32 },
}

pub trait DescriptorTable: Send + Sync {
	fn probe(&self, fd: RawFd) -> DescriptorProbe;

	/// Resolves the tunnel control id, queried through `fd`.
	fn control_id(&self, fd: RawFd) -> io::Result<u32>;

	fn interface_name(&self, fd: RawFd) -> io::Result<String>;

	fn release(&self, fd: RawFd) -> io::Result<()>;
}

/// The located descriptor. Released at most once.
pub struct TunnelDescriptor {
	fd: RawFd,
	table: Arc<dyn DescriptorTable>,
	released: bool,
}

impl TunnelDescriptor {
	pub fn fd(&self) -> RawFd {
		self.fd
	}

	pub fn is_released(&self) -> bool {
		self.released
	}

	/// Hands the descriptor back to its table. Returns false if it had
	/// already been released.
	pub fn release(&mut self) -> bool {
		if self.released {
			return false;
		}
		self.released = true;
		if let Err(e) = self.table.release(self.fd) {
			warn!(fd = self.fd, error = %e, "failed to release tunnel descriptor");
		} else {
			debug!(fd = self.fd, "tunnel descriptor released");
		}
		true
	}
}

impl Drop for TunnelDescriptor {
	fn drop(&mut self) {
		if !self.released {
			warn!(fd = self.fd, "tunnel descriptor dropped without teardown");
			self.release();
		}
	}
}

impl std::fmt::Debug for TunnelDescriptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TunnelDescriptor")
			.field("fd", &self.fd)
			.field("released", &self.released)
			.finish()
	}
}

#[derive(Clone)]
pub struct InterfaceLocator {
	table: Arc<dyn DescriptorTable>,
}

impl InterfaceLocator {
	pub fn new(table: Arc<dyn DescriptorTable>) -> Self {
		Self { table }
	}

	/// Locator backed by the kernel control sockets of this process.
	#[cfg(any(target_os = "macos", target_os = "ios"))]
	pub fn system() -> Self {
		Self::new(Arc::new(ControlSocketTable::new(false)))
	}

	/// Locator backed by the `/dev/net/tun` descriptors of this process.
	/// The host that opened the descriptor keeps it.
	#[cfg(target_os = "linux")]
	pub fn system() -> Self {
		Self::new(Arc::new(TunDeviceTable::new(None, false)))
	}

	/// Returns the lowest descriptor whose control id matches the tunnel
	/// control id. The id is resolved once, through the first control
	/// descriptor seen, and reused for the rest of the scan.
	#[instrument(skip(self))]
	pub fn locate_control_interface(&self) -> Result<TunnelDescriptor> {
		let mut expected: Option<u32> = None;

		for fd in 0..DESCRIPTOR_SCAN_LIMIT {
			let id = match self.table.probe(fd) {
				DescriptorProbe::Closed | DescriptorProbe::OtherFamily => continue,
				DescriptorProbe::Control { id } => id,
			};

			let wanted = match expected {
				Some(wanted) => wanted,
				None => match self.table.control_id(fd) {
					Ok(resolved) => {
						trace!(fd, control_id = resolved, "resolved tunnel control id");
						*expected.insert(resolved)
					}
					Err(e) => {
						debug!(fd, error = %e, "control info query failed");
						continue;
					}
				},
			};

			if id == wanted {
				info!(fd, "found tunnel interface descriptor");
				return Ok(TunnelDescriptor {
					fd,
					table: Arc::clone(&self.table),
					released: false,
				});
			}
		}

		Err(SessionError::InterfaceNotFound)
	}

	/// Best-effort interface name, for diagnostics only.
	pub fn interface_name(&self, descriptor: &TunnelDescriptor) -> String {
		match self.table.interface_name(descriptor.fd()) {
			Ok(name) if !name.is_empty() => name,
			Ok(_) => UNKNOWN_INTERFACE.to_string(),
			Err(e) => {
				warn!(fd = descriptor.fd(), error = %e, "could not read interface name");
				UNKNOWN_INTERFACE.to_string()
			}
		}
	}
}

impl std::fmt::Debug for InterfaceLocator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InterfaceLocator").finish_non_exhaustive()
	}
}

/// Copies a NUL-terminated name out of a fixed `IFNAMSIZ` buffer.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "linux"))]
pub(crate) fn name_from_buffer(buf: &[libc::c_char]) -> String {
	let bytes: Vec<u8> = buf
		.iter()
		.take_while(|&&c| c != 0)
		.map(|&c| c as u8)
		.collect();
	String::from_utf8_lossy(&bytes).into_owned()
}
