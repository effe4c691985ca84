// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Certificate pinning.
//!
//! Default chain validation against the system roots is replaced by a
//! verifier that trusts exactly one bundled anchor. Chain building and
//! signature checks are delegated to webpki. The name check is against the
//! leaf's subject common name, compared with the configured name, never
//! with whatever host or IP the request was addressed to. Subject
//! alternative names play no part in it.

use crate::error::{Result, SessionError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
	CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// The single DER certificate chains must be anchored in.
#[derive(Clone)]
pub struct TrustAnchor {
	der: CertificateDer<'static>,
}

impl TrustAnchor {
	pub fn from_der(der: Vec<u8>) -> Self {
		Self {
			der: CertificateDer::from(der),
		}
	}

	pub fn load(path: &Path) -> Result<Self> {
		let der = std::fs::read(path).map_err(|e| {
			SessionError::CertificateValidationFailure(format!(
				"cannot read anchor {}: {e}",
				path.display()
			))
		})?;
		if der.is_empty() {
			return Err(SessionError::CertificateValidationFailure(format!(
				"anchor {} is empty",
				path.display()
			)));
		}
		Ok(Self::from_der(der))
	}
}

impl std::fmt::Debug for TrustAnchor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TrustAnchor")
			.field("der_len", &self.der.len())
			.finish()
	}
}

fn provider() -> Arc<CryptoProvider> {
	Arc::new(rustls::crypto::ring::default_provider())
}

fn is_name_mismatch(err: &rustls::Error) -> bool {
	matches!(
		err,
		rustls::Error::InvalidCertificate(
			CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
		)
	)
}

/// The first common name in the certificate's subject, if it has one.
pub(crate) fn subject_common_name(der: &CertificateDer<'_>) -> Option<String> {
	let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref()).ok()?;
	let cn = cert.subject().iter_common_name().next()?;
	cn.as_str().ok().map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct TrustEvaluator {
	inner: Arc<WebPkiServerVerifier>,
	provider: Arc<CryptoProvider>,
	server_name: ServerName<'static>,
	common_name: String,
	enforce_common_name: bool,
	last_rejection: Arc<Mutex<Option<String>>>,
}

impl TrustEvaluator {
	pub fn new(anchor: &TrustAnchor, common_name: &str, enforce_common_name: bool) -> Result<Self> {
		let mut roots = RootCertStore::empty();
		roots.add(anchor.der.clone()).map_err(|e| {
			SessionError::CertificateValidationFailure(format!("unusable anchor: {e}"))
		})?;

		let provider = provider();
		let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
			.build()
			.map_err(|e| SessionError::CertificateValidationFailure(format!("verifier: {e}")))?;

		let server_name = ServerName::try_from(common_name.to_string()).map_err(|e| {
			SessionError::CertificateValidationFailure(format!("invalid common name: {e}"))
		})?;

		Ok(Self {
			inner,
			provider,
			server_name,
			common_name: common_name.to_string(),
			enforce_common_name,
			last_rejection: Arc::new(Mutex::new(None)),
		})
	}

	/// Returns true when `chain` (leaf first) is anchored in the pinned
	/// certificate and, if enforced, valid for `expected_common_name`.
	pub fn evaluate(&self, chain: &[CertificateDer<'_>], expected_common_name: &str) -> bool {
		let Some((leaf, intermediates)) = chain.split_first() else {
			return false;
		};
		self.check(leaf, intermediates, expected_common_name, UnixTime::now())
			.is_ok()
	}

	fn check(
		&self,
		leaf: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		expected_common_name: &str,
		now: UnixTime,
	) -> std::result::Result<(), rustls::Error> {
		// webpki checks the name last, so a name error means the chain itself
		// is anchored and valid.
		match self
			.inner
			.verify_server_cert(leaf, intermediates, &self.server_name, &[], now)
		{
			Ok(_) => {}
			Err(err) if is_name_mismatch(&err) => {}
			Err(err) => return Err(err),
		}

		let found = subject_common_name(leaf);
		match found.as_deref() {
			Some(cn) if cn.eq_ignore_ascii_case(expected_common_name) => Ok(()),
			_ if !self.enforce_common_name => {
				debug!(?found, "accepting anchored chain with mismatched common name");
				Ok(())
			}
			_ => {
				debug!(?found, expected = expected_common_name, "subject common name mismatch");
				Err(rustls::Error::InvalidCertificate(
					CertificateError::NotValidForName,
				))
			}
		}
	}

	/// A rustls client configuration that uses this evaluator in place of
	/// the default verifier.
	pub fn client_config(&self) -> Result<ClientConfig> {
		let config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
			.with_safe_default_protocol_versions()
			.map_err(|e| SessionError::CertificateValidationFailure(e.to_string()))?
			.dangerous()
			.with_custom_certificate_verifier(Arc::new(self.clone()))
			.with_no_client_auth();
		Ok(config)
	}

	/// The configured common name, as the server name sent in the TLS
	/// handshake.
	pub fn server_name(&self) -> &ServerName<'static> {
		&self.server_name
	}

	/// The reason of the most recent rejection, cleared on read.
	pub fn take_last_rejection(&self) -> Option<String> {
		self.last_rejection.lock().ok().and_then(|mut slot| slot.take())
	}

	fn record_rejection(&self, reason: String) {
		if let Ok(mut slot) = self.last_rejection.lock() {
			*slot = Some(reason);
		}
	}
}

impl ServerCertVerifier for TrustEvaluator {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		now: UnixTime,
	) -> std::result::Result<ServerCertVerified, rustls::Error> {
		match self.check(end_entity, intermediates, &self.common_name, now) {
			Ok(()) => Ok(ServerCertVerified::assertion()),
			Err(err) => {
				warn!(error = %err, "server certificate rejected");
				self.record_rejection(err.to_string());
				Err(err)
			}
		}
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		self.inner.verify_tls12_signature(message, cert, dss)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		self.inner.verify_tls13_signature(message, cert, dss)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.inner.supported_verify_schemes()
	}
}

/// Finds a rustls error anywhere in an error's source chain.
///
/// `std::io::Error` hides its payload from `source()`, so wrapped I/O
/// errors are unpacked with `get_ref()`.
pub(crate) fn find_tls_error<'a>(
	err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a rustls::Error> {
	let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
	while let Some(e) = current {
		if let Some(tls) = e.downcast_ref::<rustls::Error>() {
			return Some(tls);
		}
		if let Some(io) = e.downcast_ref::<std::io::Error>() {
			if let Some(inner) = io.get_ref() {
				if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
					return Some(tls);
				}
				current = inner.source();
				continue;
			}
		}
		current = e.source();
	}
	None
}

/// Certificate problems are trust failures; every other TLS error is a
/// transport failure.
pub(crate) fn is_certificate_error(err: &rustls::Error) -> bool {
	matches!(
		err,
		rustls::Error::InvalidCertificate(_)
			| rustls::Error::NoCertificatesPresented
			| rustls::Error::InvalidCertRevocationList(_)
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	const ANCHOR_CA: &[u8] = include_bytes!("../tests/fixtures/anchor_ca.der");
	const ANCHOR_LEAF: &[u8] = include_bytes!("../tests/fixtures/anchor_server.der");
	const ROGUE_CA: &[u8] = include_bytes!("../tests/fixtures/rogue_ca.der");
	const ROGUE_LEAF: &[u8] = include_bytes!("../tests/fixtures/rogue_server.der");
	const CN_ONLY_LEAF: &[u8] = include_bytes!("../tests/fixtures/cn_only_server.der");
	const SAN_ONLY_LEAF: &[u8] = include_bytes!("../tests/fixtures/san_only_server.der");

	fn evaluator(enforce: bool) -> TrustEvaluator {
		TrustEvaluator::new(&TrustAnchor::from_der(ANCHOR_CA.to_vec()), "gateway.test", enforce)
			.unwrap()
	}

	fn chain(leaf: &'static [u8]) -> Vec<CertificateDer<'static>> {
		vec![CertificateDer::from(leaf)]
	}

	#[test]
	fn anchored_chain_is_accepted() {
		assert!(evaluator(true).evaluate(&chain(ANCHOR_LEAF), "gateway.test"));
	}

	#[test]
	fn chain_from_another_root_is_rejected() {
		assert!(!evaluator(true).evaluate(&chain(ROGUE_LEAF), "gateway.test"));
		assert!(!evaluator(false).evaluate(&chain(ROGUE_LEAF), "gateway.test"));
	}

	#[test]
	fn rogue_chain_with_its_own_root_is_still_rejected() {
		let chain = vec![CertificateDer::from(ROGUE_LEAF), CertificateDer::from(ROGUE_CA)];
		assert!(!evaluator(true).evaluate(&chain, "gateway.test"));
	}

	#[test]
	fn name_mismatch_depends_on_enforcement() {
		assert!(!evaluator(true).evaluate(&chain(ANCHOR_LEAF), "other.test"));
		assert!(evaluator(false).evaluate(&chain(ANCHOR_LEAF), "other.test"));
	}

	#[test]
	fn leaf_without_alternative_names_matches_on_common_name() {
		assert!(evaluator(true).evaluate(&chain(CN_ONLY_LEAF), "gateway.test"));
		assert!(evaluator(true).evaluate(&chain(CN_ONLY_LEAF), "GATEWAY.test"));
		assert!(!evaluator(true).evaluate(&chain(CN_ONLY_LEAF), "other.test"));
	}

	#[test]
	fn alternative_name_does_not_stand_in_for_common_name() {
		// Subject CN is other.test, the only SAN is gateway.test.
		assert!(!evaluator(true).evaluate(&chain(SAN_ONLY_LEAF), "gateway.test"));
		assert!(evaluator(true).evaluate(&chain(SAN_ONLY_LEAF), "other.test"));
		assert!(evaluator(false).evaluate(&chain(SAN_ONLY_LEAF), "gateway.test"));
	}

	#[test]
	fn reads_subject_common_name() {
		assert_eq!(
			subject_common_name(&CertificateDer::from(ANCHOR_LEAF)).as_deref(),
			Some("gateway.test")
		);
		assert_eq!(
			subject_common_name(&CertificateDer::from(SAN_ONLY_LEAF)).as_deref(),
			Some("other.test")
		);
		assert_eq!(subject_common_name(&CertificateDer::from(vec![0x30, 0x00])), None);
	}

	#[test]
	fn name_errors_are_recognised_structurally() {
		assert!(is_name_mismatch(&rustls::Error::InvalidCertificate(
			CertificateError::NotValidForName
		)));
		assert!(!is_name_mismatch(&rustls::Error::InvalidCertificate(
			CertificateError::UnknownIssuer
		)));
		assert!(!is_name_mismatch(&rustls::Error::NoCertificatesPresented));
	}

	#[test]
	fn empty_chain_is_rejected() {
		assert!(!evaluator(true).evaluate(&[], "gateway.test"));
	}

	#[test]
	fn verifier_records_rejection_reason() {
		let eval = evaluator(true);
		let result = eval.verify_server_cert(
			&CertificateDer::from(ROGUE_LEAF),
			&[],
			&ServerName::try_from("ignored.example").unwrap(),
			&[],
			UnixTime::now(),
		);
		assert!(result.is_err());
		assert!(eval.take_last_rejection().is_some());
		assert!(eval.take_last_rejection().is_none());
	}

	#[test]
	fn verifier_ignores_requested_server_name() {
		let eval = evaluator(true);
		let result = eval.verify_server_cert(
			&CertificateDer::from(ANCHOR_LEAF),
			&[],
			&ServerName::try_from("203.0.113.10").unwrap(),
			&[],
			UnixTime::now(),
		);
		assert!(result.is_ok());
	}

	#[test]
	fn garbage_anchor_is_a_certificate_failure() {
		let err = TrustEvaluator::new(&TrustAnchor::from_der(vec![1, 2, 3]), "gateway.test", true)
			.unwrap_err();
		assert!(matches!(err, SessionError::CertificateValidationFailure(_)));
	}

	#[test]
	fn missing_anchor_file_is_a_certificate_failure() {
		let dir = tempfile::tempdir().unwrap();
		let err = TrustAnchor::load(&dir.path().join("absent.der")).unwrap_err();
		assert!(matches!(err, SessionError::CertificateValidationFailure(_)));
	}

	#[test]
	fn client_config_builds() {
		assert!(evaluator(true).client_config().is_ok());
	}

	#[test]
	fn finds_tls_error_inside_io_error() {
		let io = std::io::Error::new(
			std::io::ErrorKind::InvalidData,
			rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
		);
		let found = find_tls_error(&io).unwrap();
		assert!(is_certificate_error(found));
	}
}
