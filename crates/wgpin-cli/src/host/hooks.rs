// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network settings applied through user scripts.
//!
//! Each hook is run as `/bin/sh <script> <args...>` with, in order:
//! 1. interface name
//! 2. tunnel address (CIDR)
//! 3. gateway address
//! 4. MTU
//! 5. DNS servers, comma-separated
//! 6. included routes, comma-separated
//! 7. excluded routes, comma-separated

use async_trait::async_trait;
use std::fmt::Display;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};
use wgpin_session::{NetworkSettingsApplier, Result, SessionError, TunnelNetworkSettings};

fn join<T: Display>(items: &[T]) -> String {
	items
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(",")
}

pub(crate) fn hook_args(interface: &str, settings: &TunnelNetworkSettings) -> Vec<String> {
	vec![
		interface.to_string(),
		settings.tunnel_address.to_string(),
		settings.remote_address.to_string(),
		settings.mtu.to_string(),
		join(&settings.dns_servers),
		join(&settings.included_routes),
		join(&settings.excluded_routes),
	]
}

pub(crate) async fn run_hook(script: &Path, args: &[String]) -> Result<()> {
	let failure = |message: String| SessionError::NetworkSettingsApplicationFailure(message);

	let output = Command::new("/bin/sh")
		.arg(script)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.output()
		.await
		.map_err(|e| failure(format!("failed to run {}: {e}", script.display())))?;

	let stdout = String::from_utf8_lossy(&output.stdout);
	if !stdout.trim().is_empty() {
		debug!(script = %script.display(), output = %stdout.trim(), "hook output");
	}

	if !output.status.success() {
		let code = output.status.code().unwrap_or(-1);
		let stderr = String::from_utf8_lossy(&output.stderr);
		error!(script = %script.display(), code, stderr = %stderr.trim(), "hook failed");
		return Err(failure(format!(
			"{} exited with code {code}: {}",
			script.display(),
			stderr.trim()
		)));
	}
	Ok(())
}

type InterfaceFactory = Box<dyn Fn(&str) -> anyhow::Result<(OwnedFd, String)> + Send + Sync>;

struct Applied {
	args: Vec<String>,
	/// Keeps the interface alive; the locator only borrows it.
	interface: OwnedFd,
}

/// Creates the tunnel interface in-process, then hands addresses, routes
/// and resolvers to the `up` hook. `clear` runs the `down` hook with the
/// same arguments and closes the interface.
pub struct HookNetworkSettings {
	interface: String,
	up_hook: Option<PathBuf>,
	down_hook: Option<PathBuf>,
	create: InterfaceFactory,
	applied: Mutex<Option<Applied>>,
}

impl HookNetworkSettings {
	pub fn new(interface: String, up_hook: Option<PathBuf>, down_hook: Option<PathBuf>) -> Self {
		Self {
			interface,
			up_hook,
			down_hook,
			create: Box::new(super::create_interface),
			applied: Mutex::new(None),
		}
	}

	#[cfg(test)]
	fn with_factory(mut self, create: InterfaceFactory) -> Self {
		self.create = create;
		self
	}
}

#[async_trait]
impl NetworkSettingsApplier for HookNetworkSettings {
	#[instrument(skip(self, settings), fields(tunnel = %settings.tunnel_address))]
	async fn apply(&self, settings: &TunnelNetworkSettings) -> Result<()> {
		let (interface, name) = (self.create)(&self.interface).map_err(|e| {
			SessionError::NetworkSettingsApplicationFailure(format!(
				"cannot create tunnel interface: {e}"
			))
		})?;
		info!(fd = interface.as_raw_fd(), interface = %name, "created tunnel interface");

		let args = hook_args(&name, settings);
		if let Some(script) = &self.up_hook {
			run_hook(script, &args).await?;
			info!(script = %script.display(), "up hook completed");
		}

		let previous = self.applied.lock().await.replace(Applied { args, interface });
		if let Some(previous) = previous {
			debug!(fd = previous.interface.as_raw_fd(), "closing interface from an earlier apply");
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn clear(&self) -> Result<()> {
		let Some(applied) = self.applied.lock().await.take() else {
			return Ok(());
		};
		let result = match &self.down_hook {
			Some(script) => run_hook(script, &applied.args).await.map(|()| {
				info!(script = %script.display(), "down hook completed");
			}),
			None => Ok(()),
		};
		debug!(fd = applied.interface.as_raw_fd(), "closing tunnel interface");
		drop(applied);
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Read;
	use std::net::IpAddr;
	use std::os::unix::net::UnixStream;

	fn settings() -> TunnelNetworkSettings {
		TunnelNetworkSettings {
			remote_address: "203.0.113.10".parse().unwrap(),
			tunnel_address: "10.8.0.5/32".parse().unwrap(),
			dns_servers: vec![
				"10.0.0.243".parse::<IpAddr>().unwrap(),
				"10.0.0.242".parse().unwrap(),
			],
			mtu: 1280,
			included_routes: vec!["0.0.0.0/0".parse().unwrap()],
			excluded_routes: vec!["203.0.113.10/32".parse().unwrap()],
		}
	}

	#[test]
	fn args_follow_documented_order() {
		assert_eq!(
			hook_args("wgpin0", &settings()),
			vec![
				"wgpin0",
				"10.8.0.5/32",
				"203.0.113.10",
				"1280",
				"10.0.0.243,10.0.0.242",
				"0.0.0.0/0",
				"203.0.113.10/32",
			]
		);
	}

	#[tokio::test]
	async fn hook_receives_arguments() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("args");
		let script = dir.path().join("up.sh");
		std::fs::write(&script, format!("echo \"$@\" > {}\n", out.display())).unwrap();

		run_hook(&script, &hook_args("wgpin0", &settings()))
			.await
			.unwrap();

		let written = std::fs::read_to_string(&out).unwrap();
		assert_eq!(
			written.trim(),
			"wgpin0 10.8.0.5/32 203.0.113.10 1280 10.0.0.243,10.0.0.242 0.0.0.0/0 203.0.113.10/32"
		);
	}

	#[tokio::test]
	async fn failing_hook_is_a_settings_failure() {
		let dir = tempfile::tempdir().unwrap();
		let script = dir.path().join("down.sh");
		std::fs::write(&script, "echo 'route busy' >&2\nexit 7\n").unwrap();

		let err = run_hook(&script, &[]).await.unwrap_err();
		match err {
			SessionError::NetworkSettingsApplicationFailure(message) => {
				assert!(message.contains("code 7"), "{message}");
				assert!(message.contains("route busy"), "{message}");
			}
			other => panic!("unexpected error {other:?}"),
		}
	}

	#[tokio::test]
	async fn clear_without_apply_runs_nothing() {
		let hooks = HookNetworkSettings::new(
			"wgpin0".into(),
			None,
			Some(PathBuf::from("/nonexistent/down.sh")),
		);
		hooks.clear().await.unwrap();
	}

	/// An interface stand-in: one end of a socket pair. The test keeps the
	/// other end, which reads EOF once the interface end is closed.
	fn paired_factory() -> (InterfaceFactory, UnixStream) {
		let (interface, peer) = UnixStream::pair().unwrap();
		let slot = std::sync::Mutex::new(Some(OwnedFd::from(interface)));
		let create = move |name: &str| -> anyhow::Result<(OwnedFd, String)> {
			let fd = slot
				.lock()
				.unwrap()
				.take()
				.ok_or_else(|| anyhow::anyhow!("interface already created"))?;
			Ok((fd, name.to_string()))
		};
		let factory: InterfaceFactory = Box::new(create);
		(factory, peer)
	}

	fn interface_closed(peer: &mut UnixStream) -> bool {
		peer.set_nonblocking(true).unwrap();
		let mut buf = [0u8; 1];
		match peer.read(&mut buf) {
			Ok(0) => true,
			Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
			other => panic!("unexpected read result {other:?}"),
		}
	}

	#[tokio::test]
	async fn clear_closes_the_created_interface() {
		let (factory, mut peer) = paired_factory();
		let hooks = HookNetworkSettings::new("wgpin0".into(), None, None).with_factory(factory);

		hooks.apply(&settings()).await.unwrap();
		assert!(!interface_closed(&mut peer));

		hooks.clear().await.unwrap();
		assert!(interface_closed(&mut peer));
	}

	#[tokio::test]
	async fn failing_down_hook_still_closes_the_interface() {
		let dir = tempfile::tempdir().unwrap();
		let script = dir.path().join("down.sh");
		std::fs::write(&script, "exit 3\n").unwrap();

		let (factory, mut peer) = paired_factory();
		let hooks =
			HookNetworkSettings::new("wgpin0".into(), None, Some(script)).with_factory(factory);

		hooks.apply(&settings()).await.unwrap();
		assert!(hooks.clear().await.is_err());
		assert!(interface_closed(&mut peer));
	}

	#[tokio::test]
	async fn failing_up_hook_closes_the_interface() {
		let dir = tempfile::tempdir().unwrap();
		let script = dir.path().join("up.sh");
		std::fs::write(&script, "exit 1\n").unwrap();

		let (factory, mut peer) = paired_factory();
		let hooks =
			HookNetworkSettings::new("wgpin0".into(), Some(script), None).with_factory(factory);

		assert!(hooks.apply(&settings()).await.is_err());
		assert!(interface_closed(&mut peer));
		hooks.clear().await.unwrap();
	}
}
