// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The pieces a desktop host supplies to a session: interface creation,
//! descriptor lookup, network settings hooks and the engine.

mod hooks;

pub use hooks::HookNetworkSettings;

use std::os::fd::OwnedFd;
use std::sync::Arc;
use wgpin_session::{InterfaceLocator, TunnelEngine};

/// Creates a tunnel interface owned by this process. Returns the
/// descriptor and the interface name; dropping the descriptor removes
/// the interface.
#[cfg(target_os = "linux")]
pub fn create_interface(name: &str) -> anyhow::Result<(OwnedFd, String)> {
	let fd = wgpin_session::interface::create_tun(name)?;
	Ok((fd, name.to_string()))
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn create_interface(_name: &str) -> anyhow::Result<(OwnedFd, String)> {
	use std::os::fd::AsRawFd;
	use wgpin_session::interface::{create_utun, ControlSocketTable};
	use wgpin_session::DescriptorTable;

	let fd = create_utun()?;
	let name = ControlSocketTable::new(false)
		.interface_name(fd.as_raw_fd())
		.unwrap_or_else(|_| wgpin_session::interface::UNKNOWN_INTERFACE.to_string());
	Ok((fd, name))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
pub fn create_interface(_name: &str) -> anyhow::Result<(OwnedFd, String)> {
	anyhow::bail!("tunnel interfaces are not supported on this platform")
}

/// Locator for interfaces this process created itself. The descriptor
/// stays with whoever created it, so release never closes it.
#[cfg(target_os = "linux")]
pub fn locator(name: &str) -> anyhow::Result<InterfaceLocator> {
	use wgpin_session::interface::TunDeviceTable;
	Ok(InterfaceLocator::new(Arc::new(TunDeviceTable::new(
		Some(name.to_string()),
		false,
	))))
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn locator(_name: &str) -> anyhow::Result<InterfaceLocator> {
	use wgpin_session::interface::ControlSocketTable;
	Ok(InterfaceLocator::new(Arc::new(ControlSocketTable::new(false))))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
pub fn locator(_name: &str) -> anyhow::Result<InterfaceLocator> {
	anyhow::bail!("tunnel interfaces are not supported on this platform")
}

#[cfg(feature = "wireguard-go")]
pub fn engine() -> anyhow::Result<Arc<dyn TunnelEngine>> {
	Ok(Arc::new(wgpin_session::WireGuardGo))
}

#[cfg(not(feature = "wireguard-go"))]
pub fn engine() -> anyhow::Result<Arc<dyn TunnelEngine>> {
	anyhow::bail!(
		"this wgpin was built without a tunnel engine; rebuild with `--features wireguard-go` and libwg-go on the link path"
	)
}
