// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! utun control sockets on macOS and iOS.

use super::{name_from_buffer, DescriptorProbe, DescriptorTable};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

const UTUN_CONTROL_NAME: &[u8] = b"com.apple.net.utun_control";
const AF_SYSTEM: u8 = 32;
const AF_SYS_CONTROL: u16 = 2;
const SYSPROTO_CONTROL: libc::c_int = 2;
const UTUN_OPT_IFNAME: libc::c_int = 2;
const MAX_KCTL_NAME: usize = 96;
/// `_IOWR('N', 3, struct ctl_info)`
const CTLIOCGINFO: libc::c_ulong = 0xc064_4e03;

#[repr(C)]
struct SockaddrCtl {
	sc_len: u8,
	sc_family: u8,
	ss_sysaddr: u16,
	sc_id: u32,
	sc_unit: u32,
	sc_reserved: [u32; 5],
}

#[repr(C)]
struct CtlInfo {
	ctl_id: u32,
	ctl_name: [libc::c_char; MAX_KCTL_NAME],
}

pub struct ControlSocketTable {
	owns_descriptors: bool,
}

impl ControlSocketTable {
	/// `owns_descriptors` is true when this process opened the utun socket
	/// itself; otherwise the host owns it and release only forgets it.
	pub fn new(owns_descriptors: bool) -> Self {
		Self { owns_descriptors }
	}
}

fn utun_control_id(fd: RawFd) -> io::Result<u32> {
	let mut info = CtlInfo {
		ctl_id: 0,
		ctl_name: [0; MAX_KCTL_NAME],
	};
	for (dst, src) in info.ctl_name.iter_mut().zip(UTUN_CONTROL_NAME) {
		*dst = *src as libc::c_char;
	}

	// SAFETY: CTLIOCGINFO reads and writes a ctl_info, which CtlInfo mirrors.
	let ret = unsafe { libc::ioctl(fd, CTLIOCGINFO, &mut info as *mut CtlInfo) };
	if ret != 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(info.ctl_id)
}

/// Opens a utun control socket and connects it, which makes the kernel
/// create the next free `utunN`. The interface lives as long as the
/// returned descriptor.
pub fn create_interface() -> io::Result<OwnedFd> {
	// SAFETY: plain socket(2) call.
	let raw = unsafe {
		libc::socket(
			libc::c_int::from(AF_SYSTEM),
			libc::SOCK_DGRAM,
			SYSPROTO_CONTROL,
		)
	};
	if raw < 0 {
		return Err(io::Error::last_os_error());
	}
	// SAFETY: raw was just opened and nothing else refers to it.
	let socket = unsafe { OwnedFd::from_raw_fd(raw) };
	let fd = socket.as_raw_fd();

	let connect = || -> io::Result<()> {
		let addr = SockaddrCtl {
			sc_len: mem::size_of::<SockaddrCtl>() as u8,
			sc_family: AF_SYSTEM,
			ss_sysaddr: AF_SYS_CONTROL,
			sc_id: utun_control_id(fd)?,
			sc_unit: 0,
			sc_reserved: [0; 5],
		};
		// SAFETY: addr is a fully initialised sockaddr_ctl.
		let ret = unsafe {
			libc::connect(
				fd,
				&addr as *const SockaddrCtl as *const libc::sockaddr,
				mem::size_of::<SockaddrCtl>() as libc::socklen_t,
			)
		};
		if ret != 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	};

	connect()?;
	Ok(socket)
}

impl DescriptorTable for ControlSocketTable {
	fn probe(&self, fd: RawFd) -> DescriptorProbe {
		// SAFETY: all-zero is a valid SockaddrCtl.
		let mut addr: SockaddrCtl = unsafe { mem::zeroed() };
		let mut len = mem::size_of::<SockaddrCtl>() as libc::socklen_t;

		// SAFETY: addr is a writable buffer of `len` bytes.
		let ret = unsafe {
			libc::getpeername(fd, &mut addr as *mut SockaddrCtl as *mut libc::sockaddr, &mut len)
		};
		if ret != 0 {
			return match io::Error::last_os_error().raw_os_error() {
				Some(libc::EBADF) => DescriptorProbe::Closed,
				_ => DescriptorProbe::OtherFamily,
			};
		}
		if addr.sc_family != AF_SYSTEM {
			return DescriptorProbe::OtherFamily;
		}
		DescriptorProbe::Control { id: addr.sc_id }
	}

	fn control_id(&self, fd: RawFd) -> io::Result<u32> {
		utun_control_id(fd)
	}

	fn interface_name(&self, fd: RawFd) -> io::Result<String> {
		let mut buf = [0 as libc::c_char; libc::IFNAMSIZ];
		let mut len = libc::IFNAMSIZ as libc::socklen_t;

		// SAFETY: buf is IFNAMSIZ bytes and len says so.
		let ret = unsafe {
			libc::getsockopt(
				fd,
				SYSPROTO_CONTROL,
				UTUN_OPT_IFNAME,
				buf.as_mut_ptr() as *mut libc::c_void,
				&mut len,
			)
		};
		if ret != 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(name_from_buffer(&buf))
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
