// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session settings.
//!
//! [`SessionSettings`] is the loose dictionary handed over by the host (a
//! TOML file plus `WGPIN_*` environment overrides). [`SessionSettings::validate`]
//! turns it into a [`SessionConfiguration`] in one step: either every
//! required field is present and well formed, or nothing is built.

use crate::error::{Result, SessionError};
use rustls::pki_types::ServerName;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use wgpin_common_http::RetryConfig;
use wgpin_common_secret::SecretString;

pub const DEFAULT_PACKET_SIZE: u16 = 1280;
pub const DEFAULT_PORT: u16 = 443;
pub const RAW_IP_PORT: u16 = 1337;
pub const DEFAULT_ANCHOR_PATH: &str = "certs/anchor.der";

const ENV_PREFIX: &str = "WGPIN_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
	/// reqwest client with the pinned rustls configuration.
	Http,
	/// Hand-driven request over a raw TCP + rustls connection.
	Pinned,
}

impl FromStr for TransportKind {
	type Err = SessionError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"http" => Ok(Self::Http),
			"pinned" => Ok(Self::Pinned),
			other => Err(SessionError::ConfigurationInvalid {
				field: "transport",
				message: format!("expected \"http\" or \"pinned\", got {other:?}"),
			}),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
	pub max_attempts: Option<u32>,
	pub base_delay_ms: Option<u64>,
	pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
	pub dns_servers: Option<Vec<String>>,
	pub packet_size: Option<u16>,
	pub auth_token: Option<SecretString>,
	pub ping_target: Option<String>,
	pub common_name: Option<String>,
	pub use_raw_ip: Option<bool>,
	pub server_address: Option<String>,

	pub transport: Option<String>,
	pub port: Option<u16>,
	pub anchor_certificate: Option<PathBuf>,
	pub enforce_common_name: Option<bool>,
	pub ping_interval_secs: Option<u64>,
	pub ping_timeout_secs: Option<u64>,
	pub path_poll_interval_secs: Option<u64>,
	pub request_timeout_secs: Option<u64>,
	pub liveness_failure_threshold: Option<u32>,
	pub restart_on_path_change: Option<bool>,
	pub retry: RetrySettings,

	/// Directory relative paths are resolved against.
	#[serde(skip)]
	pub base_dir: Option<PathBuf>,
}

fn invalid(field: &'static str, message: impl Into<String>) -> SessionError {
	SessionError::ConfigurationInvalid {
		field,
		message: message.into(),
	}
}

fn parse_env<T: FromStr>(field: &'static str, value: &str) -> Result<T>
where
	T::Err: std::fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e: T::Err| invalid(field, format!("{e}")))
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(invalid(field, format!("not a boolean: {other:?}"))),
	}
}

fn positive_secs(field: &'static str, value: Option<u64>, default: u64) -> Result<Duration> {
	match value.unwrap_or(default) {
		0 => Err(invalid(field, "must be greater than zero")),
		secs => Ok(Duration::from_secs(secs)),
	}
}

fn present(value: &Option<String>) -> bool {
	value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl SessionSettings {
	pub fn from_toml_str(contents: &str) -> Result<Self> {
		toml::from_str(contents).map_err(|e| invalid("config", e.to_string()))
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let contents = std::fs::read_to_string(path)
			.map_err(|e| invalid("config", format!("{}: {e}", path.display())))?;
		let mut settings = Self::from_toml_str(&contents)?;
		settings.base_dir = path.parent().map(Path::to_path_buf);
		Ok(settings)
	}

	/// Overlays `WGPIN_*` variables from the process environment.
	pub fn apply_env(&mut self) -> Result<()> {
		self.apply_env_from(|name| std::env::var(name).ok())
	}

	pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

		if let Some(v) = var("DNS_SERVERS") {
			self.dns_servers = Some(
				v.split(',')
					.map(str::trim)
					.filter(|s| !s.is_empty())
					.map(String::from)
					.collect(),
			);
		}
		if let Some(v) = var("PACKET_SIZE") {
			self.packet_size = Some(parse_env("packet_size", &v)?);
		}
		if let Some(v) = var("AUTH_TOKEN") {
			self.auth_token = Some(SecretString::new(v));
		}
		if let Some(v) = var("PING_TARGET") {
			self.ping_target = Some(v);
		}
		if let Some(v) = var("COMMON_NAME") {
			self.common_name = Some(v);
		}
		if let Some(v) = var("USE_RAW_IP") {
			self.use_raw_ip = Some(parse_bool("use_raw_ip", &v)?);
		}
		if let Some(v) = var("SERVER_ADDRESS") {
			self.server_address = Some(v);
		}
		if let Some(v) = var("TRANSPORT") {
			self.transport = Some(v);
		}
		if let Some(v) = var("PORT") {
			self.port = Some(parse_env("port", &v)?);
		}
		if let Some(v) = var("ANCHOR_CERTIFICATE") {
			self.anchor_certificate = Some(PathBuf::from(v));
		}
		if let Some(v) = var("ENFORCE_COMMON_NAME") {
			self.enforce_common_name = Some(parse_bool("enforce_common_name", &v)?);
		}
		if let Some(v) = var("PING_INTERVAL_SECS") {
			self.ping_interval_secs = Some(parse_env("ping_interval_secs", &v)?);
		}
		if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
			self.request_timeout_secs = Some(parse_env("request_timeout_secs", &v)?);
		}
		Ok(())
	}

	/// Builds the typed configuration, or reports the first problem.
	///
	/// Presence of the required fields is checked first, in declaration
	/// order, so a settings file missing several of them always names the
	/// same one.
	pub fn validate(&self) -> Result<SessionConfiguration> {
		let dns_servers = match &self.dns_servers {
			Some(list) if !list.is_empty() => list,
			_ => return Err(SessionError::ConfigurationMissing("dns_servers")),
		};
		let auth_token = match &self.auth_token {
			Some(token) if !token.is_empty() => token,
			_ => return Err(SessionError::ConfigurationMissing("auth_token")),
		};
		if !present(&self.ping_target) {
			return Err(SessionError::ConfigurationMissing("ping_target"));
		}
		if !present(&self.common_name) {
			return Err(SessionError::ConfigurationMissing("common_name"));
		}
		if !present(&self.server_address) {
			return Err(SessionError::ConfigurationMissing("server_address"));
		}

		let ping_target = self.ping_target.as_deref().unwrap_or_default().trim().to_string();
		let common_name = self.common_name.as_deref().unwrap_or_default().trim().to_string();
		let server_address = self
			.server_address
			.as_deref()
			.unwrap_or_default()
			.trim()
			.to_string();

		let dns_servers = dns_servers
			.iter()
			.map(|s| {
				s.trim()
					.parse::<IpAddr>()
					.map_err(|_| invalid("dns_servers", format!("not an IP address: {s:?}")))
			})
			.collect::<Result<Vec<_>>>()?;

		ServerName::try_from(common_name.clone())
			.map_err(|e| invalid("common_name", e.to_string()))?;

		let use_raw_ip = self.use_raw_ip.unwrap_or(false);
		if use_raw_ip && server_address.parse::<IpAddr>().is_err() {
			return Err(invalid(
				"server_address",
				"use_raw_ip requires an IP address",
			));
		}

		let packet_size = match self.packet_size.unwrap_or(DEFAULT_PACKET_SIZE) {
			0 => return Err(invalid("packet_size", "must be greater than zero")),
			n => n,
		};

		let transport = match &self.transport {
			Some(t) => t.parse()?,
			None if use_raw_ip => TransportKind::Pinned,
			None => TransportKind::Http,
		};

		let port = match (use_raw_ip, self.port) {
			(true, Some(port)) if port != RAW_IP_PORT => {
				return Err(invalid(
					"port",
					format!("the direct-IP form always uses port {RAW_IP_PORT}"),
				));
			}
			(true, _) => RAW_IP_PORT,
			(false, port) => port.unwrap_or(DEFAULT_PORT),
		};

		let anchor = self
			.anchor_certificate
			.clone()
			.unwrap_or_else(|| PathBuf::from(DEFAULT_ANCHOR_PATH));
		let anchor_certificate = match &self.base_dir {
			Some(dir) if anchor.is_relative() => dir.join(anchor),
			_ => anchor,
		};

		let defaults = RetryConfig::default();
		let retry = RetryConfig {
			max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
			base_delay: self
				.retry
				.base_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.base_delay),
			max_delay: self
				.retry
				.max_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.max_delay),
			..defaults
		};

		let liveness_failure_threshold = match self.liveness_failure_threshold.unwrap_or(3) {
			0 => {
				return Err(invalid(
					"liveness_failure_threshold",
					"must be greater than zero",
				))
			}
			n => n,
		};

		Ok(SessionConfiguration {
			dns_servers,
			packet_size,
			auth_token: auth_token.clone(),
			ping_target,
			common_name,
			use_raw_ip,
			server_address,
			transport,
			port,
			anchor_certificate,
			enforce_common_name: self.enforce_common_name.unwrap_or(true),
			ping_interval: positive_secs("ping_interval_secs", self.ping_interval_secs, 10)?,
			ping_timeout: positive_secs("ping_timeout_secs", self.ping_timeout_secs, 5)?,
			path_poll_interval: positive_secs(
				"path_poll_interval_secs",
				self.path_poll_interval_secs,
				2,
			)?,
			request_timeout: positive_secs("request_timeout_secs", self.request_timeout_secs, 15)?,
			liveness_failure_threshold,
			restart_on_path_change: self.restart_on_path_change.unwrap_or(true),
			retry,
		})
	}
}

/// Validated, read-only view of the session settings.
#[derive(Debug, Clone)]
pub struct SessionConfiguration {
	pub dns_servers: Vec<IpAddr>,
	pub packet_size: u16,
	pub auth_token: SecretString,
	pub ping_target: String,
	pub common_name: String,
	pub use_raw_ip: bool,
	pub server_address: String,
	pub transport: TransportKind,
	pub port: u16,
	pub anchor_certificate: PathBuf,
	pub enforce_common_name: bool,
	pub ping_interval: Duration,
	pub ping_timeout: Duration,
	pub path_poll_interval: Duration,
	pub request_timeout: Duration,
	pub liveness_failure_threshold: u32,
	pub restart_on_path_change: bool,
	pub retry: RetryConfig,
}
