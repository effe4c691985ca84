// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Both registration transports against a local TLS gateway.

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use wgpin_session::{
	response, HttpTransport, PinnedTransport, RegistrationRequest, SessionConfiguration,
	SessionError, SessionSettings, TransportStrategy, TrustAnchor, TrustEvaluator,
};
use wgpin_wg_common::WgPublicKey;

const ANCHOR_CA: &[u8] = include_bytes!("fixtures/anchor_ca.der");
const ANCHOR_SERVER: &[u8] = include_bytes!("fixtures/anchor_server.der");
const ANCHOR_SERVER_KEY: &[u8] = include_bytes!("fixtures/anchor_server.key.der");
const ROGUE_CA: &[u8] = include_bytes!("fixtures/rogue_ca.der");
const ROGUE_SERVER: &[u8] = include_bytes!("fixtures/rogue_server.der");
const ROGUE_SERVER_KEY: &[u8] = include_bytes!("fixtures/rogue_server.key.der");
const CN_ONLY_SERVER: &[u8] = include_bytes!("fixtures/cn_only_server.der");
const CN_ONLY_SERVER_KEY: &[u8] = include_bytes!("fixtures/cn_only_server.key.der");

const TOKEN: &str = "pt+token/1=";

struct Gateway {
	addr: SocketAddr,
	requests: Arc<Mutex<Vec<String>>>,
}

async fn spawn_gateway(
	server: &'static [u8],
	ca: &'static [u8],
	key: &'static [u8],
	status: u16,
	body: &'static str,
) -> Gateway {
	let reply = format!(
		"HTTP/1.1 {status} Gateway\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
		body.len()
	);
	spawn_raw_gateway(server, ca, key, reply.into_bytes()).await
}

/// Answers every request with `reply`, byte for byte.
async fn spawn_raw_gateway(
	server: &'static [u8],
	ca: &'static [u8],
	key: &'static [u8],
	reply: Vec<u8>,
) -> Gateway {
	let chain = vec![
		CertificateDer::from(server.to_vec()),
		CertificateDer::from(ca.to_vec()),
	];
	let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.to_vec()));
	let config = ServerConfig::builder_with_provider(Arc::new(
		rustls::crypto::ring::default_provider(),
	))
	.with_safe_default_protocol_versions()
	.unwrap()
	.with_no_client_auth()
	.with_single_cert(chain, key)
	.unwrap();
	let acceptor = TlsAcceptor::from(Arc::new(config));

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let requests = Arc::new(Mutex::new(Vec::new()));
	let seen = Arc::clone(&requests);

	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				return;
			};
			let acceptor = acceptor.clone();
			let seen = Arc::clone(&seen);
			let reply = reply.clone();
			tokio::spawn(async move {
				let Ok(mut tls) = acceptor.accept(stream).await else {
					return;
				};

				let mut head = Vec::new();
				let mut buf = [0u8; 1024];
				while !head.windows(4).any(|w| w == b"\r\n\r\n") {
					match tls.read(&mut buf).await {
						Ok(0) | Err(_) => return,
						Ok(n) => head.extend_from_slice(&buf[..n]),
					}
				}
				let text = String::from_utf8_lossy(&head);
				if let Some(line) = text.lines().next() {
					seen.lock().unwrap().push(line.to_string());
				}

				let _ = tls.write_all(&reply).await;
				let _ = tls.shutdown().await;
			});
		}
	});

	Gateway { addr, requests }
}

fn config(addr: SocketAddr) -> SessionConfiguration {
	let mut config = SessionSettings {
		dns_servers: Some(vec!["10.0.0.243".into()]),
		auth_token: Some(TOKEN.into()),
		ping_target: Some("10.0.0.1".into()),
		common_name: Some("gateway.test".into()),
		server_address: Some(addr.ip().to_string()),
		use_raw_ip: Some(true),
		request_timeout_secs: Some(5),
		..Default::default()
	}
	.validate()
	.unwrap();
	// The direct-IP form is fixed to 1337; the local gateway is not.
	config.port = addr.port();
	config
}

fn registration(addr: SocketAddr) -> RegistrationRequest {
	RegistrationRequest::new(&config(addr), &public_key()).unwrap()
}

async fn assert_network_failure(reply: &[u8]) {
	let gateway =
		spawn_raw_gateway(ANCHOR_SERVER, ANCHOR_CA, ANCHOR_SERVER_KEY, reply.to_vec()).await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		let result = transport.fetch(&request).await;
		assert!(
			matches!(result, Err(SessionError::NetworkFailure(_))),
			"{} transport: {result:?}",
			transport.name()
		);
	}
}

fn trust(common_name: &str, enforce: bool) -> TrustEvaluator {
	TrustEvaluator::new(&TrustAnchor::from_der(ANCHOR_CA.to_vec()), common_name, enforce).unwrap()
}

fn transports(trust: &TrustEvaluator) -> Vec<Arc<dyn TransportStrategy>> {
	let timeout = Duration::from_secs(5);
	vec![
		Arc::new(HttpTransport::new(trust, timeout).unwrap()),
		Arc::new(PinnedTransport::new(trust, timeout).unwrap()),
	]
}

fn public_key() -> WgPublicKey {
	WgPublicKey::from_bytes([0x3e; 32])
}

#[tokio::test]
async fn anchored_gateway_is_accepted_by_both_transports() {
	let gateway = spawn_gateway(
		ANCHOR_SERVER,
		ANCHOR_CA,
		ANCHOR_SERVER_KEY,
		200,
		r#"{"status":"OK","server_ip":"10.0.0.2"}"#,
	)
	.await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		let body = transport.fetch(&request).await.unwrap_or_else(|e| {
			panic!("{} transport failed: {e}", transport.name());
		});
		let parsed = response::parse(&body, &public_key()).unwrap();
		assert_eq!(parsed.server_ip, "10.0.0.2");
	}

	let requests = gateway.requests.lock().unwrap();
	assert_eq!(requests.len(), 2);
	for line in requests.iter() {
		assert!(line.starts_with("GET /addKey?pubkey="), "{line}");
		assert!(line.contains("&pt=pt%2Btoken%2F1%3D"), "{line}");
	}
}

#[tokio::test]
async fn rogue_chain_is_a_certificate_failure() {
	let gateway = spawn_gateway(
		ROGUE_SERVER,
		ROGUE_CA,
		ROGUE_SERVER_KEY,
		200,
		r#"{"server_ip":"10.0.0.2"}"#,
	)
	.await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		let err = transport.fetch(&request).await.unwrap_err();
		assert!(
			matches!(err, SessionError::CertificateValidationFailure(_)),
			"{} transport: {err:?}",
			transport.name()
		);
	}
	assert!(gateway.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn common_name_mismatch_is_rejected_when_enforced() {
	let gateway = spawn_gateway(
		ANCHOR_SERVER,
		ANCHOR_CA,
		ANCHOR_SERVER_KEY,
		200,
		r#"{"server_ip":"10.0.0.2"}"#,
	)
	.await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("other.test", true)) {
		let err = transport.fetch(&request).await.unwrap_err();
		assert!(
			matches!(err, SessionError::CertificateValidationFailure(_)),
			"{} transport: {err:?}",
			transport.name()
		);
	}

	for transport in transports(&trust("other.test", false)) {
		assert!(transport.fetch(&request).await.is_ok());
	}
}

#[tokio::test]
async fn empty_error_body_is_empty_response() {
	let gateway = spawn_gateway(ANCHOR_SERVER, ANCHOR_CA, ANCHOR_SERVER_KEY, 502, "").await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		assert_eq!(
			transport.fetch(&request).await.unwrap_err(),
			SessionError::EmptyResponse { status: 502 }
		);
	}
}

#[tokio::test]
async fn missing_server_ip_is_a_parse_failure() {
	let gateway = spawn_gateway(
		ANCHOR_SERVER,
		ANCHOR_CA,
		ANCHOR_SERVER_KEY,
		200,
		r#"{"server_ip":""}"#,
	)
	.await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		let body = transport.fetch(&request).await.unwrap();
		let err = response::parse(&body, &public_key()).unwrap_err();
		match err {
			SessionError::ResponseParseFailure { raw_body, public_key: key } => {
				assert_eq!(raw_body, r#"{"server_ip":""}"#);
				assert_eq!(key, public_key().to_base64());
				assert!(!raw_body.contains("token"));
			}
			other => panic!("unexpected error {other:?}"),
		}
	}
}

#[tokio::test]
async fn overflowing_chunk_size_is_a_network_failure() {
	assert_network_failure(
		b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nfffffffffffffffff\r\nabc\r\n0\r\n\r\n",
	)
	.await;
}

#[tokio::test]
async fn truncated_chunk_is_a_network_failure() {
	assert_network_failure(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nff\r\nabc").await;
}

#[tokio::test]
async fn body_shorter_than_content_length_is_a_network_failure() {
	assert_network_failure(
		b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"server_ip\"",
	)
	.await;
}

#[tokio::test]
async fn non_http_reply_is_a_network_failure() {
	assert_network_failure(b"SSH-2.0-OpenSSH_9.6\r\n\r\n").await;
}

#[tokio::test]
async fn oversized_body_is_refused_by_the_pinned_transport() {
	let body = "x".repeat(70 * 1024);
	let reply = format!(
		"HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
		body.len()
	);
	let gateway =
		spawn_raw_gateway(ANCHOR_SERVER, ANCHOR_CA, ANCHOR_SERVER_KEY, reply.into_bytes()).await;

	let evaluator = trust("gateway.test", true);
	let transport = PinnedTransport::new(&evaluator, Duration::from_secs(5)).unwrap();
	assert!(matches!(
		transport.fetch(&registration(gateway.addr)).await,
		Err(SessionError::NetworkFailure(_))
	));
}

#[tokio::test]
async fn chunked_body_is_decoded_by_both_transports() {
	let gateway = spawn_raw_gateway(
		ANCHOR_SERVER,
		ANCHOR_CA,
		ANCHOR_SERVER_KEY,
		b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n9\r\n{\"server_\r\nf;ext=1\r\nip\":\"10.0.0.2\"}\r\n0\r\n\r\n".to_vec(),
	)
	.await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		let body = transport.fetch(&request).await.unwrap();
		assert_eq!(body, br#"{"server_ip":"10.0.0.2"}"#, "{}", transport.name());
	}
}

#[tokio::test]
async fn certificate_without_alternative_names_matches_on_common_name() {
	let gateway = spawn_gateway(
		CN_ONLY_SERVER,
		ANCHOR_CA,
		CN_ONLY_SERVER_KEY,
		200,
		r#"{"server_ip":"10.0.0.2"}"#,
	)
	.await;
	let request = registration(gateway.addr);

	for transport in transports(&trust("gateway.test", true)) {
		assert!(
			transport.fetch(&request).await.is_ok(),
			"{} transport",
			transport.name()
		);
	}
	for transport in transports(&trust("other.test", true)) {
		assert!(matches!(
			transport.fetch(&request).await,
			Err(SessionError::CertificateValidationFailure(_))
		));
	}
}
