// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registration over a hand-driven TLS connection.
//!
//! Opens a TCP stream, runs the rustls handshake with the pinned verifier
//! and sends one `Connection: close` GET over a bare hyper HTTP/1.1
//! connection. The connection is driven inside the same future as the
//! exchange, so the request timeout bounds all of it.

use super::{check_body, error_chain, RegistrationRequest, TransportStrategy};
use crate::error::{Result, SessionError};
use crate::trust::{find_tls_error, is_certificate_error, TrustEvaluator};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty, Limited};
use hyper::body::Bytes;
use hyper::header::{ACCEPT, CONNECTION, HOST, USER_AGENT};
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

const MAX_RESPONSE_BYTES: usize = 64 * 1024;

pub struct PinnedTransport {
	connector: TlsConnector,
	trust: TrustEvaluator,
	timeout: Duration,
}

impl PinnedTransport {
	pub fn new(trust: &TrustEvaluator, timeout: Duration) -> Result<Self> {
		Ok(Self {
			connector: TlsConnector::from(Arc::new(trust.client_config()?)),
			trust: trust.clone(),
			timeout,
		})
	}

	fn map_io(&self, err: io::Error) -> SessionError {
		if let Some(tls) = find_tls_error(&err) {
			if is_certificate_error(tls) {
				return SessionError::CertificateValidationFailure(tls.to_string());
			}
		}
		if let Some(reason) = self.trust.take_last_rejection() {
			return SessionError::CertificateValidationFailure(reason);
		}
		SessionError::NetworkFailure(err.to_string())
	}

	fn map_http(&self, err: hyper::Error) -> SessionError {
		if let Some(tls) = find_tls_error(&err) {
			if is_certificate_error(tls) {
				return SessionError::CertificateValidationFailure(tls.to_string());
			}
		}
		SessionError::NetworkFailure(error_chain(&err))
	}

	async fn exchange(&self, request: &RegistrationRequest) -> Result<Vec<u8>> {
		let host = request.host();
		let tcp = TcpStream::connect((host.as_str(), request.port()))
			.await
			.map_err(|e| SessionError::NetworkFailure(format!("connect {}: {e}", request.authority())))?;
		if let Err(e) = tcp.set_nodelay(true) {
			debug!(error = %e, "could not set TCP_NODELAY");
		}

		let tls = self
			.connector
			.connect(self.trust.server_name().clone(), tcp)
			.await
			.map_err(|e| self.map_io(e))?;
		debug!("tls handshake complete");

		let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
			.await
			.map_err(|e| self.map_http(e))?;

		let path = request.path_and_query();
		let get = Request::get(path.expose().as_str())
			.header(HOST, request.authority())
			.header(USER_AGENT, wgpin_common_http::user_agent())
			.header(ACCEPT, "application/json")
			.header(CONNECTION, "close")
			.body(Empty::<Bytes>::new())
			.map_err(|e| SessionError::NetworkFailure(format!("cannot build request: {e}")))?;

		let exchange = async {
			let response = sender.send_request(get).await.map_err(|e| self.map_http(e))?;
			let status = response.status().as_u16();
			let body = Limited::new(response.into_body(), MAX_RESPONSE_BYTES)
				.collect()
				.await
				.map_err(|e| {
					SessionError::NetworkFailure(format!("reading response: {}", error_chain(&*e)))
				})?
				.to_bytes();
			Ok::<_, SessionError>((status, body))
		};

		let mut conn = std::pin::pin!(conn);
		let (status, body) = tokio::select! {
			result = exchange => result?,
			Err(e) = &mut conn => return Err(self.map_http(e)),
		};

		debug!(status, bytes = body.len(), "registration response received");
		check_body(status, body.to_vec())
	}
}

#[async_trait]
impl TransportStrategy for PinnedTransport {
	#[instrument(skip(self, request), fields(authority = %request.authority()))]
	async fn fetch(&self, request: &RegistrationRequest) -> Result<Vec<u8>> {
		self.trust.take_last_rejection();

		tokio::time::timeout(self.timeout, self.exchange(request))
			.await
			.map_err(|_| {
				SessionError::NetworkFailure(format!(
					"registration timed out after {}s",
					self.timeout.as_secs()
				))
			})?
	}

	fn name(&self) -> &'static str {
		"pinned"
	}
}
