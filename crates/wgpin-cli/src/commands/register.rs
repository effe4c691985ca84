// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{build_transport, load_config, ConfigArgs};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use wgpin_session::{response, RegistrationClient, RegistrationRequest};
use wgpin_wg_common::WgKeyPair;

/// Registration dry run: keys, request and parse, no OS networking.
#[instrument(skip(args), fields(config = %args.config.display()))]
pub async fn handle(args: ConfigArgs) -> anyhow::Result<()> {
	let config = load_config(&args.config)?;
	let transport = build_transport(&config)?;

	let keypair = WgKeyPair::generate()?;
	let public_key = *keypair.public_key();
	info!(%public_key, transport = transport.name(), "registering ephemeral key");

	let request = RegistrationRequest::new(&config, &public_key)?;
	let client = RegistrationClient::new(transport, config.retry.clone());

	let cancel = CancellationToken::new();
	let ctrl_c = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			ctrl_c.cancel();
		}
	});

	let body = client
		.register(&request, &cancel)
		.await
		.ok_or_else(|| anyhow::anyhow!("registration cancelled"))??;
	let reply = response::parse(&body, &public_key)?;

	println!("{} Registered", style("✓").green().bold());
	println!("  Public key:  {}", style(public_key).cyan());
	println!("  Server IP:   {}", style(&reply.server_ip).cyan());
	if let Some(port) = reply.server_port {
		println!("  Server port: {}", style(port).cyan());
	}
	if let Some(peer_ip) = &reply.peer_ip {
		println!("  Tunnel IP:   {}", style(peer_ip).cyan());
	}
	if !reply.dns_servers.is_empty() {
		println!("  DNS:         {}", style(reply.dns_servers.join(", ")).cyan());
	}

	Ok(())
}
