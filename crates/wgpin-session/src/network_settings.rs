// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::config::SessionConfiguration;
use crate::error::{Result, SessionError};
use crate::response::ServerResponse;
use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net};
use std::net::IpAddr;

/// What the host must configure on the virtual interface. Applying it is
/// what creates the interface descriptor the locator then searches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelNetworkSettings {
	pub remote_address: IpAddr,
	pub tunnel_address: IpNet,
	pub dns_servers: Vec<IpAddr>,
	pub mtu: u16,
	pub included_routes: Vec<IpNet>,
	pub excluded_routes: Vec<IpNet>,
}

fn host_net(addr: IpAddr) -> IpNet {
	IpNet::from(addr)
}

impl TunnelNetworkSettings {
	pub fn derive(response: &ServerResponse, config: &SessionConfiguration) -> Result<Self> {
		let remote_address = response.server_ip_addr().ok_or_else(|| {
			SessionError::NetworkSettingsApplicationFailure(format!(
				"server_ip {:?} is not an IP address",
				response.server_ip
			))
		})?;
		let peer_ip = response.peer_ip_addr().ok_or_else(|| {
			SessionError::NetworkSettingsApplicationFailure(
				"gateway did not assign a tunnel address".to_string(),
			)
		})?;

		Ok(Self {
			remote_address,
			tunnel_address: host_net(peer_ip),
			dns_servers: config.dns_servers.clone(),
			mtu: config.packet_size,
			included_routes: vec![default_route()],
			excluded_routes: vec![host_net(remote_address)],
		})
	}
}

/// `0.0.0.0/0`.
fn default_route() -> IpNet {
	IpNet::V4(Ipv4Net::default())
}

/// Host-side collaborator that configures (and later removes) the
/// interface addresses, routes and resolvers.
#[async_trait]
pub trait NetworkSettingsApplier: Send + Sync {
	async fn apply(&self, settings: &TunnelNetworkSettings) -> Result<()>;

	async fn clear(&self) -> Result<()>;
}
