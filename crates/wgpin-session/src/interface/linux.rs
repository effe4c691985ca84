// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `/dev/net/tun` descriptors on Linux.
//!
//! A tun descriptor is recognised through `/proc/self/fd`, and its control
//! id is the kernel index of the interface it is attached to.

use super::{name_from_buffer, DescriptorProbe, DescriptorTable};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

const TUN_DEVICE: &str = "/dev/net/tun";
/// `_IOR('T', 210, unsigned int)`
const TUNGETIFF: libc::c_ulong = 0x8004_54d2;
/// `_IOW('T', 202, int)`
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

/// Opens `/dev/net/tun` and attaches it to a layer-3 interface called
/// `name`, creating it if needed. The interface lives as long as the
/// returned descriptor.
pub fn create_interface(name: &str) -> io::Result<OwnedFd> {
	if name.is_empty() || name.len() >= libc::IFNAMSIZ {
		return Err(io::Error::new(
			io::ErrorKind::InvalidInput,
			format!("interface name {name:?} must be 1..{} bytes", libc::IFNAMSIZ),
		));
	}

	let file = std::fs::OpenOptions::new()
		.read(true)
		.write(true)
		.open(TUN_DEVICE)?;

	// SAFETY: all-zero is a valid ifreq.
	let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
	for (dst, src) in ifr.ifr_name.iter_mut().zip(name.bytes()) {
		*dst = src as libc::c_char;
	}
	ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

	// SAFETY: TUNSETIFF reads an ifreq; file stays open across the call.
	let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &ifr as *const libc::ifreq) };
	if ret < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(file.into())
}

pub struct TunDeviceTable {
	expected_name: Option<String>,
	owns_descriptors: bool,
}

impl TunDeviceTable {
	/// With `expected_name`, only the tun attached to that interface
	/// matches; without it, the first tun descriptor does.
	///
	/// `owns_descriptors` hands the located descriptor to the session, so
	/// release closes it. Otherwise whoever opened it keeps it and release
	/// only forgets it.
	pub fn new(expected_name: Option<String>, owns_descriptors: bool) -> Self {
		Self {
			expected_name,
			owns_descriptors,
		}
	}

	fn is_tun(fd: RawFd) -> io::Result<bool> {
		let target = std::fs::read_link(format!("/proc/self/fd/{fd}"))?;
		Ok(target == Path::new(TUN_DEVICE))
	}

	fn attached_name(fd: RawFd) -> io::Result<String> {
		// SAFETY: all-zero is a valid ifreq.
		let mut ifr: libc::ifreq = unsafe { mem::zeroed() };

		// SAFETY: TUNGETIFF fills an ifreq.
		let ret = unsafe { libc::ioctl(fd, TUNGETIFF as _, &mut ifr as *mut libc::ifreq) };
		if ret < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(name_from_buffer(&ifr.ifr_name))
	}

	fn index_of(name: &str) -> io::Result<u32> {
		let c_name = CString::new(name)
			.map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;

		// SAFETY: c_name is a valid C string.
		let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
		if index == 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(index)
	}
}

impl DescriptorTable for TunDeviceTable {
	fn probe(&self, fd: RawFd) -> DescriptorProbe {
		match Self::is_tun(fd) {
			Err(_) => DescriptorProbe::Closed,
			Ok(false) => DescriptorProbe::OtherFamily,
			Ok(true) => match Self::attached_name(fd).and_then(|name| Self::index_of(&name)) {
				Ok(id) => DescriptorProbe::Control { id },
				Err(_) => DescriptorProbe::OtherFamily,
			},
		}
	}

	fn control_id(&self, fd: RawFd) -> io::Result<u32> {
		match &self.expected_name {
			Some(name) => Self::index_of(name),
			None => Self::index_of(&Self::attached_name(fd)?),
		}
	}

	fn interface_name(&self, fd: RawFd) -> io::Result<String> {
		Self::attached_name(fd)
	}

	fn release(&self, fd: RawFd) -> io::Result<()> {
		if !self.owns_descriptors {
			return Ok(());
		}
		// SAFETY: fd was located by this table and is closed exactly once.
		if unsafe { libc::close(fd) } != 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	}
}
