// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Handoff to the external tunnel engine.
//!
//! The engine takes a UAPI text blob and the interface descriptor and
//! returns a handle; a negative handle means it refused to start.

use crate::error::{Result, SessionError};
use crate::response::ServerResponse;
use ipnet::{IpNet, Ipv4Net};
use std::fmt::Write as _;
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::{error, info, instrument};
use wgpin_common_secret::SecretString;
use wgpin_wg_common::{Endpoint, PeerConfiguration, WgKeyPair, WgPublicKey};

pub const PERSISTENT_KEEPALIVE_SECS: u16 = 25;

/// Returned by the launcher when required engine input is missing.
pub const MISSING_INPUT_CODE: i32 = -1;

pub trait TunnelEngine: Send + Sync {
	fn turn_on(&self, config: &str, fd: RawFd) -> i32;

	fn turn_off(&self, handle: i32);

	fn version(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(i32);

impl EngineHandle {
	pub fn raw(&self) -> i32 {
		self.0
	}
}

/// Builds the single gateway peer out of a registration reply.
pub fn peer_from_response(response: &ServerResponse) -> Result<PeerConfiguration> {
	let missing = |what: &str| {
		error!(field = what, "gateway response lacks engine input");
		SessionError::EngineStartFailure(MISSING_INPUT_CODE)
	};

	let key = response.server_key.as_deref().ok_or_else(|| missing("server_key"))?;
	let port = response.server_port.ok_or_else(|| missing("server_port"))?;
	let ip = response.server_ip_addr().ok_or_else(|| missing("server_ip"))?;

	let public_key = WgPublicKey::from_base64(key).map_err(|e| {
		error!(error = %e, "gateway server_key is not a WireGuard key");
		SessionError::EngineStartFailure(MISSING_INPUT_CODE)
	})?;

	Ok(PeerConfiguration::new(public_key)
		.with_endpoint(Endpoint::from_ip(ip, port))
		.with_allowed_ip(IpNet::V4(Ipv4Net::default()))
		.with_keepalive(PERSISTENT_KEEPALIVE_SECS))
}

/// Renders the UAPI `set` body for one peer. Contains the private key.
pub fn uapi_config(keypair: &WgKeyPair, peer: &PeerConfiguration) -> SecretString {
	let mut out = String::new();
	let _ = writeln!(out, "private_key={}", keypair.private_key().to_hex().expose());
	out.push_str("replace_peers=true\n");
	let _ = writeln!(out, "public_key={}", peer.public_key.to_hex());
	if let Some(psk) = &peer.preshared_key {
		let _ = writeln!(out, "preshared_key={}", psk.to_hex().expose());
	}
	if let Some(endpoint) = &peer.endpoint {
		let _ = writeln!(out, "endpoint={endpoint}");
	}
	if let Some(keepalive) = peer.persistent_keepalive {
		let _ = writeln!(out, "persistent_keepalive_interval={keepalive}");
	}
	out.push_str("replace_allowed_ips=true\n");
	for net in &peer.allowed_ips {
		let _ = writeln!(out, "allowed_ip={net}");
	}
	SecretString::new(out)
}

pub struct TunnelEngineLauncher {
	engine: Arc<dyn TunnelEngine>,
}

impl TunnelEngineLauncher {
	pub fn new(engine: Arc<dyn TunnelEngine>) -> Self {
		Self { engine }
	}

	#[instrument(skip(self, keypair, peer))]
	pub fn start(
		&self,
		keypair: &WgKeyPair,
		peer: &PeerConfiguration,
		fd: RawFd,
	) -> Result<EngineHandle> {
		let config = uapi_config(keypair, peer);
		let handle = self.engine.turn_on(config.expose(), fd);
		if handle < 0 {
			error!(code = handle, "tunnel engine refused to start");
			return Err(SessionError::EngineStartFailure(handle));
		}

		info!(
			handle,
			version = self.engine.version().as_deref().unwrap_or("unknown"),
			"tunnel engine started"
		);
		Ok(EngineHandle(handle))
	}

	pub fn stop(&self, handle: EngineHandle) {
		self.engine.turn_off(handle.0);
		info!(handle = handle.0, "tunnel engine stopped");
	}
}

impl std::fmt::Debug for TunnelEngineLauncher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TunnelEngineLauncher")
			.field("version", &self.engine.version())
			.finish()
	}
}

#[cfg(feature = "wireguard-go")]
pub use ffi::WireGuardGo;

#[cfg(feature = "wireguard-go")]
mod ffi {
	use super::TunnelEngine;
	use std::ffi::{CStr, CString};
	use std::os::fd::RawFd;
	use std::os::raw::{c_char, c_int};
	use tracing::error;

	#[link(name = "wg-go", kind = "static")]
	extern "C" {
		fn wgTurnOn(settings: *const c_char, tun_fd: i32) -> c_int;
		fn wgTurnOff(handle: c_int);
		fn wgVersion() -> *const c_char;
	}

	/// wireguard-go linked as `libwg-go.a`.
	#[derive(Debug, Default)]
	pub struct WireGuardGo;

	impl TunnelEngine for WireGuardGo {
		fn turn_on(&self, config: &str, fd: RawFd) -> i32 {
			let Ok(settings) = CString::new(config) else {
				error!("engine configuration contains a NUL byte");
				return -1;
			};
			// SAFETY: settings outlives the call; the engine copies it.
			unsafe { wgTurnOn(settings.as_ptr(), fd) }
		}

		fn turn_off(&self, handle: i32) {
			// SAFETY: handle came from wgTurnOn.
			unsafe { wgTurnOff(handle) }
		}

		fn version(&self) -> Option<String> {
			// SAFETY: wgVersion returns a static NUL-terminated string or null.
			let ptr = unsafe { wgVersion() };
			if ptr.is_null() {
				return None;
			}
			// SAFETY: checked non-null above.
			Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
		}
	}
}
