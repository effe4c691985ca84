// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{Result, SessionError};
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;
use wgpin_wg_common::WgPublicKey;

/// Tunnel parameters returned by `/addKey`.
///
/// Only `server_ip` is required here. Fields the engine needs are checked
/// when the engine is launched; anything unrecognised lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerResponse {
	#[serde(default)]
	pub status: Option<String>,
	#[serde(default)]
	pub server_ip: String,
	#[serde(default)]
	pub server_key: Option<String>,
	#[serde(default)]
	pub server_port: Option<u16>,
	#[serde(default)]
	pub server_vip: Option<String>,
	#[serde(default)]
	pub peer_ip: Option<String>,
	#[serde(default)]
	pub peer_pubkey: Option<String>,
	#[serde(default)]
	pub dns_servers: Vec<String>,
	#[serde(flatten)]
	pub extra: BTreeMap<String, serde_json::Value>,
}

impl ServerResponse {
	pub fn server_ip_addr(&self) -> Option<IpAddr> {
		self.server_ip.trim().parse().ok()
	}

	/// The tunnel address, accepting both `10.1.2.3` and `10.1.2.3/32`.
	pub fn peer_ip_addr(&self) -> Option<IpAddr> {
		let raw = self.peer_ip.as_deref()?.trim();
		raw.parse::<IpNet>()
			.map(|net| net.addr())
			.or_else(|_| raw.parse::<IpAddr>())
			.ok()
	}
}

/// Decodes a registration reply.
///
/// Failures carry the raw body and our public key so the reply can be
/// matched against gateway logs.
pub fn parse(body: &[u8], public_key: &WgPublicKey) -> Result<ServerResponse> {
	let failure = || SessionError::ResponseParseFailure {
		raw_body: String::from_utf8_lossy(body).into_owned(),
		public_key: public_key.to_base64(),
	};

	let response: ServerResponse = serde_json::from_slice(body).map_err(|e| {
		debug!(error = %e, "registration response is not valid json");
		failure()
	})?;

	if response.server_ip.trim().is_empty() {
		return Err(failure());
	}
	if let Some(status) = &response.status {
		if status != "OK" {
			debug!(%status, "gateway reported a non-OK status");
			return Err(failure());
		}
	}

	Ok(response)
}
