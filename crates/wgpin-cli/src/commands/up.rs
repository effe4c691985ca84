// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{build_transport, load_config, UpArgs};
use crate::host::{self, HookNetworkSettings};
use console::style;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use wgpin_session::{
	AbortReason, Collaborators, IcmpProbe, InterfaceAddressSource, SessionConfiguration,
	SessionController,
};

fn collaborators(config: &SessionConfiguration, args: &UpArgs) -> anyhow::Result<Collaborators> {
	Ok(Collaborators {
		transport: build_transport(config)?,
		network: Arc::new(HookNetworkSettings::new(
			args.interface.clone(),
			args.up_hook.clone(),
			args.down_hook.clone(),
		)),
		locator: host::locator(&args.interface)?,
		engine: host::engine()?,
		path_source: Some(Arc::new(InterfaceAddressSource)),
		liveness_probe: Some(Arc::new(IcmpProbe::new(
			config.ping_target.clone(),
			config.ping_timeout,
		))),
	})
}

/// Restarts are for supervisory aborts only; a failed bootstrap or a
/// host stop ends the command.
fn should_restart(reason: &AbortReason) -> bool {
	matches!(
		reason,
		AbortReason::LivenessLost { .. } | AbortReason::PathChanged
	)
}

#[instrument(skip(args), fields(config = %args.config.config.display()))]
pub async fn handle(args: UpArgs) -> anyhow::Result<()> {
	let config = load_config(&args.config.config)?;
	let mut restarts = 0;

	loop {
		let mut controller = SessionController::new(config.clone(), collaborators(&config, &args)?);
		let stop = controller.stop_handle();
		let ctrl_c = tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				stop.request_stop();
			}
		});

		let reason = match controller.start().await {
			Ok(()) => {
				let session = controller.session();
				println!("{} Tunnel up", style("✓").green().bold());
				if let Some(name) = &session.interface_name {
					println!("  Interface: {}", style(name).cyan());
				}
				if let Some(ip) = session.server_ip {
					println!("  Gateway:   {}", style(ip).cyan());
				}
				println!("\nPress Ctrl+C to stop the tunnel...");
				controller.supervise().await
			}
			Err(reason) => reason,
		};
		ctrl_c.abort();

		if reason == AbortReason::HostRequested {
			println!("{} Tunnel stopped", style("✓").green().bold());
			return Ok(());
		}

		if should_restart(&reason) && restarts < args.max_restarts {
			restarts += 1;
			warn!(%reason, restarts, max = args.max_restarts, "restarting session");
			println!("{} {reason}, reconnecting...", style("→").yellow());
			tokio::time::sleep(config.retry.base_delay).await;
			continue;
		}

		info!(%reason, "session ended");
		return Err(reason.into());
	}
}
