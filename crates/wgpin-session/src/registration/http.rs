// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{check_body, error_chain, RegistrationRequest, TransportStrategy};
use crate::error::{Result, SessionError};
use crate::trust::{find_tls_error, is_certificate_error, TrustEvaluator};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Registration over a `reqwest` client whose TLS layer is the pinned
/// rustls configuration.
pub struct HttpTransport {
	client: Client,
	trust: TrustEvaluator,
}

impl HttpTransport {
	pub fn new(trust: &TrustEvaluator, timeout: Duration) -> Result<Self> {
		let client = wgpin_common_http::builder()
			.use_preconfigured_tls(trust.client_config()?)
			.connect_timeout(timeout)
			.timeout(timeout)
			.build()
			.map_err(|e| SessionError::NetworkFailure(format!("cannot build http client: {e}")))?;

		Ok(Self {
			client,
			trust: trust.clone(),
		})
	}

	fn map_error(&self, err: reqwest::Error) -> SessionError {
		// The URL carries the auth token.
		let err = err.without_url();

		if let Some(tls) = find_tls_error(&err) {
			if is_certificate_error(tls) {
				return SessionError::CertificateValidationFailure(tls.to_string());
			}
		}
		if let Some(reason) = self.trust.take_last_rejection() {
			return SessionError::CertificateValidationFailure(reason);
		}
		SessionError::NetworkFailure(error_chain(&err))
	}
}

#[async_trait]
impl TransportStrategy for HttpTransport {
	#[instrument(skip(self, request), fields(authority = %request.authority()))]
	async fn fetch(&self, request: &RegistrationRequest) -> Result<Vec<u8>> {
		self.trust.take_last_rejection();

		let response = self
			.client
			.get(request.as_url().clone())
			.send()
			.await
			.map_err(|e| self.map_error(e))?;

		let status = response.status().as_u16();
		let body = response.bytes().await.map_err(|e| self.map_error(e))?;
		debug!(status, bytes = body.len(), "registration response received");

		check_body(status, body.to_vec())
	}

	fn name(&self) -> &'static str {
		"http"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::trust::TrustAnchor;

	#[test]
	fn builds_with_pinned_tls() {
		let anchor = TrustAnchor::from_der(include_bytes!("../../tests/fixtures/anchor_ca.der").to_vec());
		let trust = TrustEvaluator::new(&anchor, "gateway.test", true).unwrap();
		let transport = HttpTransport::new(&trust, Duration::from_secs(5)).unwrap();
		assert_eq!(transport.name(), "http");
	}
}
