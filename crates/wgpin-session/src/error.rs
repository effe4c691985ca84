// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use wgpin_common_http::RetryableError;
use wgpin_wg_common::KeyError;

/// Every way a session attempt can fail.
///
/// Causes are carried as strings so the error can be cloned into the
/// terminal [`crate::SessionState::Aborted`] state and handed to the host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
	#[error("missing configuration field: {0}")]
	ConfigurationMissing(&'static str),

	#[error("invalid configuration field {field}: {message}")]
	ConfigurationInvalid { field: &'static str, message: String },

	#[error("key generation failed: {0}")]
	CryptoFailure(String),

	#[error("network failure: {0}")]
	NetworkFailure(String),

	#[error("certificate validation failed: {0}")]
	CertificateValidationFailure(String),

	#[error("gateway returned status {status} with an empty body")]
	EmptyResponse { status: u16 },

	#[error("could not parse gateway response for public key {public_key}: {raw_body}")]
	ResponseParseFailure { raw_body: String, public_key: String },

	#[error("no control interface descriptor found")]
	InterfaceNotFound,

	#[error("tunnel engine failed to start (code {0})")]
	EngineStartFailure(i32),

	#[error("failed to apply network settings: {0}")]
	NetworkSettingsApplicationFailure(String),
}

impl SessionError {
	/// Only transport and trust failures are transient by nature.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::NetworkFailure(_) | Self::CertificateValidationFailure(_)
		)
	}

	/// Short stable tag for structured log fields.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::ConfigurationMissing(_) => "configuration_missing",
			Self::ConfigurationInvalid { .. } => "configuration_invalid",
			Self::CryptoFailure(_) => "crypto_failure",
			Self::NetworkFailure(_) => "network_failure",
			Self::CertificateValidationFailure(_) => "certificate_validation_failure",
			Self::EmptyResponse { .. } => "empty_response",
			Self::ResponseParseFailure { .. } => "response_parse_failure",
			Self::InterfaceNotFound => "interface_not_found",
			Self::EngineStartFailure(_) => "engine_start_failure",
			Self::NetworkSettingsApplicationFailure(_) => "network_settings_failure",
		}
	}
}

impl RetryableError for SessionError {
	fn is_retryable(&self) -> bool {
		SessionError::is_retryable(self)
	}
}

impl From<KeyError> for SessionError {
	fn from(err: KeyError) -> Self {
		match err {
			KeyError::Entropy(cause) => Self::CryptoFailure(cause),
			other => Self::CryptoFailure(other.to_string()),
		}
	}
}

pub type Result<T> = std::result::Result<T, SessionError>;
