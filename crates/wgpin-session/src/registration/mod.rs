// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key registration with the gateway.
//!
//! The request is a single `GET /addKey?pubkey=..&pt=..` over a TLS channel
//! whose trust is decided by [`crate::trust::TrustEvaluator`]. Two transports
//! implement [`TransportStrategy`] and are interchangeable.

mod http;
mod pinned;

pub use http::HttpTransport;
pub use pinned::PinnedTransport;

use crate::config::{SessionConfiguration, TransportKind, DEFAULT_PORT};
use crate::error::{Result, SessionError};
use crate::trust::TrustEvaluator;
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::{Host, Position, Url};
use wgpin_common_http::RetryConfig;
use wgpin_common_secret::SecretString;
use wgpin_wg_common::WgPublicKey;

pub const REGISTRATION_PATH: &str = "/addKey";

/// Everything needed to send one registration. Built once per attempt.
#[derive(Clone)]
pub struct RegistrationRequest {
	/// Carries the auth token in its query; never log it.
	url: Url,
	common_name: String,
	public_key: WgPublicKey,
}

impl RegistrationRequest {
	/// Fails only when `server_address` cannot be the host of a URL.
	pub fn new(config: &SessionConfiguration, public_key: &WgPublicKey) -> Result<Self> {
		let host = match config.server_address.parse::<IpAddr>() {
			Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
			_ => config.server_address.clone(),
		};
		let mut url = Url::parse(&format!("https://{host}:{}{REGISTRATION_PATH}", config.port))
			.map_err(|e| SessionError::ConfigurationInvalid {
				field: "server_address",
				message: e.to_string(),
			})?;
		url.query_pairs_mut()
			.append_pair("pubkey", &public_key.to_base64())
			.append_pair("pt", config.auth_token.expose());

		Ok(Self {
			url,
			common_name: config.common_name.clone(),
			public_key: *public_key,
		})
	}

	/// The host to connect to, without IPv6 brackets.
	pub fn host(&self) -> String {
		match self.url.host() {
			Some(Host::Domain(domain)) => domain.to_string(),
			Some(Host::Ipv4(ip)) => ip.to_string(),
			Some(Host::Ipv6(ip)) => ip.to_string(),
			None => String::new(),
		}
	}

	pub fn port(&self) -> u16 {
		self.url.port_or_known_default().unwrap_or(DEFAULT_PORT)
	}

	pub fn common_name(&self) -> &str {
		&self.common_name
	}

	pub fn public_key(&self) -> &WgPublicKey {
		&self.public_key
	}

	/// `host:port` as it appears in a URL authority or `Host` header.
	pub fn authority(&self) -> String {
		format!("{}:{}", self.url.host_str().unwrap_or_default(), self.port())
	}

	/// Path plus query string. Contains the auth token; never log it.
	pub fn path_and_query(&self) -> SecretString {
		SecretString::new(self.url[Position::BeforePath..].to_string())
	}

	/// Full URL. Contains the auth token; never log it.
	pub(crate) fn as_url(&self) -> &Url {
		&self.url
	}
}

impl fmt::Debug for RegistrationRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegistrationRequest")
			.field("authority", &self.authority())
			.field("common_name", &self.common_name)
			.field("public_key", &self.public_key.to_base64())
			.finish_non_exhaustive()
	}
}

#[async_trait]
pub trait TransportStrategy: Send + Sync {
	/// Sends the request and returns the raw response body.
	async fn fetch(&self, request: &RegistrationRequest) -> Result<Vec<u8>>;

	fn name(&self) -> &'static str;
}

/// Builds the transport selected by configuration.
pub fn transport_for(
	config: &SessionConfiguration,
	trust: &TrustEvaluator,
) -> Result<Arc<dyn TransportStrategy>> {
	Ok(match config.transport {
		TransportKind::Http => Arc::new(HttpTransport::new(trust, config.request_timeout)?),
		TransportKind::Pinned => Arc::new(PinnedTransport::new(trust, config.request_timeout)?),
	})
}

/// Maps a non-success status with an empty body; anything else goes to
/// the parser unchanged.
pub(crate) fn check_body(status: u16, body: Vec<u8>) -> Result<Vec<u8>> {
	if !(200..300).contains(&status) && body.iter().all(u8::is_ascii_whitespace) {
		return Err(SessionError::EmptyResponse { status });
	}
	Ok(body)
}

/// An error and its sources, joined with `: `.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
	let mut message = err.to_string();
	let mut source = err.source();
	while let Some(cause) = source {
		message.push_str(": ");
		message.push_str(&cause.to_string());
		source = cause.source();
	}
	message
}

pub struct RegistrationClient {
	transport: Arc<dyn TransportStrategy>,
	retry: RetryConfig,
}

impl RegistrationClient {
	pub fn new(transport: Arc<dyn TransportStrategy>, retry: RetryConfig) -> Self {
		Self { transport, retry }
	}

	/// Registers the public key, retrying transient failures.
	///
	/// Returns `None` when `cancel` fires first; the in-flight request is
	/// dropped and its result never observed.
	#[instrument(
		skip(self, request, cancel),
		fields(transport = self.transport.name(), authority = %request.authority())
	)]
	pub async fn register(
		&self,
		request: &RegistrationRequest,
		cancel: &CancellationToken,
	) -> Option<Result<Vec<u8>>> {
		let attempt = wgpin_common_http::retry(&self.retry, || self.transport.fetch(request));

		tokio::select! {
			biased;

			_ = cancel.cancelled() => {
				warn!("registration cancelled");
				None
			}
			result = attempt => {
				if let Ok(body) = &result {
					info!(bytes = body.len(), "gateway accepted key registration");
				}
				Some(result)
			}
		}
	}
}

impl fmt::Debug for RegistrationClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegistrationClient")
			.field("transport", &self.transport.name())
			.field("retry", &self.retry)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SessionSettings;
	use proptest::prelude::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;

	fn config(raw_ip: bool) -> SessionConfiguration {
		SessionSettings {
			dns_servers: Some(vec!["10.0.0.243".into()]),
			auth_token: Some("pt+tok/en=".into()),
			ping_target: Some("10.0.0.1".into()),
			common_name: Some("gateway.test".into()),
			server_address: Some(if raw_ip { "203.0.113.10" } else { "gw.example.net" }.into()),
			use_raw_ip: Some(raw_ip),
			..Default::default()
		}
		.validate()
		.unwrap()
	}

	fn key() -> WgPublicKey {
		WgPublicKey::from_bytes([0xfb; 32])
	}

	#[test]
	fn url_uses_hostname_form() {
		let request = RegistrationRequest::new(&config(false), &key()).unwrap();
		assert!(request
			.as_url()
			.as_str()
			.starts_with("https://gw.example.net/addKey?pubkey="));
		assert_eq!(request.host(), "gw.example.net");
		assert_eq!(request.port(), 443);
		assert_eq!(request.authority(), "gw.example.net:443");
	}

	#[test]
	fn url_uses_raw_ip_port() {
		let request = RegistrationRequest::new(&config(true), &key()).unwrap();
		assert!(request
			.as_url()
			.as_str()
			.starts_with("https://203.0.113.10:1337/addKey?"));
		assert_eq!(request.common_name(), "gateway.test");
	}

	#[test]
	fn query_escapes_base64_and_token() {
		let request = RegistrationRequest::new(&config(false), &key()).unwrap();
		let query = request.path_and_query();
		let query = query.expose();

		let pubkey = query
			.strip_prefix("/addKey?pubkey=")
			.and_then(|rest| rest.split("&pt=").next())
			.unwrap();

		assert!(!pubkey.contains(['+', '/', '=']));
		assert!(pubkey.contains("%2B"));
		assert!(pubkey.contains("%2F"));
		assert!(pubkey.ends_with("%3D"));
		assert!(query.ends_with("&pt=pt%2Btok%2Fen%3D"));
	}

	#[test]
	fn ipv6_host_is_bracketed_only_in_the_authority() {
		let mut cfg = config(true);
		cfg.server_address = "2001:db8::1".into();
		let request = RegistrationRequest::new(&cfg, &key()).unwrap();
		assert_eq!(request.authority(), "[2001:db8::1]:1337");
		assert_eq!(request.host(), "2001:db8::1");
	}

	#[test]
	fn unusable_server_address_is_invalid_configuration() {
		let mut cfg = config(false);
		cfg.server_address = "gw example net".into();
		assert!(matches!(
			RegistrationRequest::new(&cfg, &key()).unwrap_err(),
			SessionError::ConfigurationInvalid {
				field: "server_address",
				..
			}
		));
	}

	#[test]
	fn error_chain_joins_sources() {
		let inner = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
		let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);
		assert!(error_chain(&outer).contains("peer reset"));
	}

	#[test]
	fn debug_hides_token() {
		let request = RegistrationRequest::new(&config(false), &key()).unwrap();
		let debug = format!("{request:?}");
		assert!(!debug.contains("pt+tok"));
		assert!(!debug.contains("pt%2Btok"));
		assert!(debug.contains("gw.example.net"));
	}

	#[test]
	fn empty_non_success_body_is_empty_response() {
		assert_eq!(
			check_body(502, Vec::new()).unwrap_err(),
			SessionError::EmptyResponse { status: 502 }
		);
		assert_eq!(check_body(500, b"{\"x\":1}".to_vec()).unwrap(), b"{\"x\":1}");
		assert!(check_body(200, Vec::new()).unwrap().is_empty());
	}

	struct FlakyTransport {
		calls: AtomicU32,
		failures: u32,
		error: SessionError,
	}

	#[async_trait]
	impl TransportStrategy for FlakyTransport {
		async fn fetch(&self, _request: &RegistrationRequest) -> Result<Vec<u8>> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			if n < self.failures {
				Err(self.error.clone())
			} else {
				Ok(b"{\"server_ip\":\"10.0.0.2\"}".to_vec())
			}
		}

		fn name(&self) -> &'static str {
			"flaky"
		}
	}

	fn fast_retry() -> RetryConfig {
		RetryConfig {
			max_attempts: 3,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(2),
			backoff_factor: 2.0,
			jitter: false,
		}
	}

	#[tokio::test]
	async fn network_failures_are_retried() {
		let transport = Arc::new(FlakyTransport {
			calls: AtomicU32::new(0),
			failures: 2,
			error: SessionError::NetworkFailure("reset".into()),
		});
		let client = RegistrationClient::new(transport.clone(), fast_retry());
		let request = RegistrationRequest::new(&config(false), &key()).unwrap();

		let result = client
			.register(&request, &CancellationToken::new())
			.await
			.unwrap();
		assert!(result.is_ok());
		assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn empty_response_is_not_retried() {
		let transport = Arc::new(FlakyTransport {
			calls: AtomicU32::new(0),
			failures: 5,
			error: SessionError::EmptyResponse { status: 403 },
		});
		let client = RegistrationClient::new(transport.clone(), fast_retry());
		let request = RegistrationRequest::new(&config(false), &key()).unwrap();

		let result = client
			.register(&request, &CancellationToken::new())
			.await
			.unwrap();
		assert_eq!(result.unwrap_err(), SessionError::EmptyResponse { status: 403 });
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn cancelled_registration_yields_nothing() {
		struct Hanging;

		#[async_trait]
		impl TransportStrategy for Hanging {
			async fn fetch(&self, _request: &RegistrationRequest) -> Result<Vec<u8>> {
				futures::future::pending().await
			}

			fn name(&self) -> &'static str {
				"hanging"
			}
		}

		let client = RegistrationClient::new(Arc::new(Hanging), fast_retry());
		let request = RegistrationRequest::new(&config(false), &key()).unwrap();
		let cancel = CancellationToken::new();
		cancel.cancel();

		assert!(client.register(&request, &cancel).await.is_none());
	}

	proptest! {
		#[test]
		fn query_decodes_back_to_key_and_token(token in "[ -~]{1,48}", seed in any::<u8>()) {
			let mut cfg = config(false);
			cfg.auth_token = SecretString::new(token.clone());
			let public_key = WgPublicKey::from_bytes([seed; 32]);
			let request = RegistrationRequest::new(&cfg, &public_key).unwrap();

			let pairs: Vec<(String, String)> = request
				.as_url()
				.query_pairs()
				.map(|(k, v)| (k.into_owned(), v.into_owned()))
				.collect();
			prop_assert_eq!(
				pairs,
				vec![
					("pubkey".to_string(), public_key.to_base64()),
					("pt".to_string(), token),
				]
			);
		}
	}
}
