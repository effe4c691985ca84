// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod locate;
pub mod register;
pub mod up;

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wgpin_session::{
	transport_for, SessionConfiguration, SessionSettings, TransportStrategy, TrustAnchor,
	TrustEvaluator,
};

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
	/// Session settings file (TOML)
	#[arg(long, short, env = "WGPIN_CONFIG")]
	pub config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct LocateArgs {
	/// Create a tunnel interface in this process first
	#[arg(long)]
	pub create: bool,

	/// Interface name to create (Linux only)
	#[arg(long, default_value = "wgpin0")]
	pub interface: String,
}

#[derive(Debug, Clone, Args)]
pub struct UpArgs {
	#[command(flatten)]
	pub config: ConfigArgs,

	/// Script run with the derived network settings once registration succeeds
	#[arg(long)]
	pub up_hook: Option<PathBuf>,

	/// Script run with the same arguments during teardown
	#[arg(long)]
	pub down_hook: Option<PathBuf>,

	/// Tunnel interface name (Linux only)
	#[arg(long, default_value = "wgpin0")]
	pub interface: String,

	/// New attempts allowed after a path change or lost liveness
	#[arg(long, default_value_t = 3)]
	pub max_restarts: u32,
}

/// Reads, overlays `WGPIN_*` variables onto, and validates a settings file.
pub fn load_config(path: &Path) -> anyhow::Result<SessionConfiguration> {
	let mut settings = SessionSettings::from_file(path)
		.with_context(|| format!("failed to load {}", path.display()))?;
	settings.apply_env().context("invalid WGPIN_* override")?;
	settings
		.validate()
		.with_context(|| format!("invalid session settings in {}", path.display()))
}

/// The configured registration transport, pinned to the configured anchor.
pub fn build_transport(config: &SessionConfiguration) -> anyhow::Result<Arc<dyn TransportStrategy>> {
	let anchor = TrustAnchor::load(&config.anchor_certificate)?;
	let trust = TrustEvaluator::new(&anchor, &config.common_name, config.enforce_common_name)?;
	Ok(transport_for(config, &trust)?)
}
