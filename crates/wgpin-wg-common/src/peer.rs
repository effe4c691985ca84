// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer description handed to the tunnel engine.
//!
//! Two configurations describe the same peer when their keys, endpoint,
//! keepalive and allowed IP *set* agree. Traffic counters and the last
//! handshake time are observations, not configuration, and are ignored by
//! `PartialEq` and `Hash`.

use crate::keys::{KeyError, WgPresharedKey, WgPublicKey};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
	#[error("endpoint is missing a port: {0}")]
	MissingPort(String),

	#[error("invalid port in endpoint: {0}")]
	InvalidPort(String),

	#[error("endpoint host is empty")]
	EmptyHost,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointHost {
	Ip(IpAddr),
	Name(String),
}

impl fmt::Display for EndpointHost {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
			Self::Ip(ip) => write!(f, "{ip}"),
			Self::Name(name) => f.write_str(name),
		}
	}
}

/// `host:port`, where the host is an IPv4 literal, a bracketed IPv6 literal
/// or a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
	pub host: EndpointHost,
	pub port: u16,
}

impl Endpoint {
	pub fn new(host: EndpointHost, port: u16) -> Self {
		Self { host, port }
	}

	pub fn from_ip(ip: IpAddr, port: u16) -> Self {
		Self::new(EndpointHost::Ip(ip), port)
	}

	pub fn socket_addr(&self) -> Option<SocketAddr> {
		match self.host {
			EndpointHost::Ip(ip) => Some(SocketAddr::new(ip, self.port)),
			EndpointHost::Name(_) => None,
		}
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

impl From<SocketAddr> for Endpoint {
	fn from(addr: SocketAddr) -> Self {
		Self::from_ip(addr.ip(), addr.port())
	}
}

impl FromStr for Endpoint {
	type Err = EndpointParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if let Ok(addr) = s.parse::<SocketAddr>() {
			return Ok(addr.into());
		}

		let (host, port) = s
			.rsplit_once(':')
			.ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
		let port: u16 = port
			.parse()
			.map_err(|_| EndpointParseError::InvalidPort(port.to_string()))?;

		let host = host.trim_start_matches('[').trim_end_matches(']');
		if host.is_empty() {
			return Err(EndpointParseError::EmptyHost);
		}
		if host.contains(':') && host.parse::<IpAddr>().is_err() {
			return Err(EndpointParseError::MissingPort(s.to_string()));
		}

		let host = match host.parse::<IpAddr>() {
			Ok(ip) => EndpointHost::Ip(ip),
			Err(_) => EndpointHost::Name(host.to_string()),
		};
		Ok(Self { host, port })
	}
}

impl Serialize for Endpoint {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Endpoint {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[derive(Debug, Clone)]
pub struct PeerConfiguration {
	pub public_key: WgPublicKey,
	pub preshared_key: Option<WgPresharedKey>,
	pub allowed_ips: Vec<IpNet>,
	pub endpoint: Option<Endpoint>,
	pub persistent_keepalive: Option<u16>,
	pub rx_bytes: Option<u64>,
	pub tx_bytes: Option<u64>,
	pub last_handshake_time: Option<DateTime<Utc>>,
}

impl PeerConfiguration {
	pub fn new(public_key: WgPublicKey) -> Self {
		Self {
			public_key,
			preshared_key: None,
			allowed_ips: Vec::new(),
			endpoint: None,
			persistent_keepalive: None,
			rx_bytes: None,
			tx_bytes: None,
			last_handshake_time: None,
		}
	}

	/// Builds a peer from raw key bytes received over the wire.
	pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
		Ok(Self::new(WgPublicKey::from_slice(bytes)?))
	}

	pub fn with_preshared_key(mut self, bytes: &[u8]) -> Result<Self, KeyError> {
		self.preshared_key = Some(WgPresharedKey::from_slice(bytes)?);
		Ok(self)
	}

	pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
		self.endpoint = Some(endpoint);
		self
	}

	pub fn with_allowed_ip(mut self, net: IpNet) -> Self {
		self.allowed_ips.push(net);
		self
	}

	pub fn with_keepalive(mut self, seconds: u16) -> Self {
		self.persistent_keepalive = Some(seconds);
		self
	}

	fn allowed_ip_set(&self) -> BTreeSet<IpNet> {
		self.allowed_ips.iter().copied().collect()
	}
}

impl PartialEq for PeerConfiguration {
	fn eq(&self, other: &Self) -> bool {
		self.public_key == other.public_key
			&& self.preshared_key == other.preshared_key
			&& self.endpoint == other.endpoint
			&& self.persistent_keepalive == other.persistent_keepalive
			&& self.allowed_ip_set() == other.allowed_ip_set()
	}
}

impl Eq for PeerConfiguration {}

impl Hash for PeerConfiguration {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.public_key.hash(state);
		self.preshared_key.hash(state);
		self.endpoint.hash(state);
		self.persistent_keepalive.hash(state);
		for net in self.allowed_ip_set() {
			net.hash(state);
		}
	}
}
