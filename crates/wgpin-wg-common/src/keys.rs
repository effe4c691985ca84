// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use wgpin_common_secret::{Secret, SecretString};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

pub const KEY_LENGTH: usize = 32;

#[derive(Error, Debug)]
pub enum KeyError {
	#[error("invalid key length: expected {KEY_LENGTH} bytes, got {0}")]
	InvalidLength(usize),

	#[error("invalid base64 encoding: {0}")]
	InvalidBase64(#[from] base64::DecodeError),

	#[error("secure random source unavailable: {0}")]
	Entropy(String),
}

pub type Result<T> = std::result::Result<T, KeyError>;

fn key_array(bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
	<[u8; KEY_LENGTH]>::try_from(bytes).map_err(|_| KeyError::InvalidLength(bytes.len()))
}

#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct WgPrivateKey {
	bytes: [u8; KEY_LENGTH],
}

impl WgPrivateKey {
	/// Draws a fresh Curve25519 secret from the operating system RNG.
	///
	/// Entropy exhaustion is reported as [`KeyError::Entropy`] rather than a
	/// panic so the session can abort cleanly.
	pub fn generate() -> Result<Self> {
		let mut bytes = [0u8; KEY_LENGTH];
		OsRng
			.try_fill_bytes(&mut bytes)
			.map_err(|e| KeyError::Entropy(e.to_string()))?;
		let secret = StaticSecret::from(bytes);
		bytes.zeroize();
		Ok(Self {
			bytes: secret.to_bytes(),
		})
	}

	pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
		Self { bytes }
	}

	pub fn from_slice(bytes: &[u8]) -> Result<Self> {
		Ok(Self {
			bytes: key_array(bytes)?,
		})
	}

	pub fn from_base64(s: &str) -> Result<Self> {
		let mut decoded = STANDARD.decode(s)?;
		let key = Self::from_slice(&decoded);
		decoded.zeroize();
		key
	}

	pub fn to_base64(&self) -> SecretString {
		Secret::new(STANDARD.encode(self.bytes))
	}

	/// Lowercase hex, the encoding the tunnel engine's UAPI expects.
	pub fn to_hex(&self) -> SecretString {
		Secret::new(hex::encode(self.bytes))
	}

	pub fn public_key(&self) -> WgPublicKey {
		let secret = StaticSecret::from(self.bytes);
		WgPublicKey {
			bytes: *PublicKey::from(&secret).as_bytes(),
		}
	}
}

impl fmt::Debug for WgPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WgPrivateKey")
			.field("bytes", &wgpin_common_secret::REDACTED)
			.finish()
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WgPublicKey {
	bytes: [u8; KEY_LENGTH],
}

impl WgPublicKey {
	pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
		Self { bytes }
	}

	/// Builds a key from untrusted input, rejecting anything but 32 bytes.
	pub fn from_slice(bytes: &[u8]) -> Result<Self> {
		Ok(Self {
			bytes: key_array(bytes)?,
		})
	}

	pub fn from_base64(s: &str) -> Result<Self> {
		Self::from_slice(&STANDARD.decode(s.trim())?)
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.bytes)
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.bytes)
	}

	pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
		&self.bytes
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let b64 = self.to_base64();
		f.debug_struct("WgPublicKey")
			.field("prefix", &format!("{}...", &b64[..8]))
			.finish()
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl Serialize for WgPublicKey {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for WgPublicKey {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Self::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

/// Optional symmetric key mixed into the handshake of a single peer.
#[derive(Clone, PartialEq, Eq, Hash, Zeroize)]
#[zeroize(drop)]
pub struct WgPresharedKey {
	bytes: [u8; KEY_LENGTH],
}

impl WgPresharedKey {
	pub fn from_slice(bytes: &[u8]) -> Result<Self> {
		Ok(Self {
			bytes: key_array(bytes)?,
		})
	}

	pub fn to_hex(&self) -> SecretString {
		Secret::new(hex::encode(self.bytes))
	}
}

impl fmt::Debug for WgPresharedKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("WgPresharedKey([REDACTED])")
	}
}

/// The ephemeral key pair of one session attempt.
#[derive(Clone)]
pub struct WgKeyPair {
	private: WgPrivateKey,
	public: WgPublicKey,
}

impl WgKeyPair {
	pub fn generate() -> Result<Self> {
		Ok(Self::from_private_key(WgPrivateKey::generate()?))
	}

	pub fn from_private_key(private: WgPrivateKey) -> Self {
		let public = private.public_key();
		Self { private, public }
	}

	pub fn private_key(&self) -> &WgPrivateKey {
		&self.private
	}

	pub fn public_key(&self) -> &WgPublicKey {
		&self.public
	}
}

impl fmt::Debug for WgKeyPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WgKeyPair")
			.field("private", &self.private)
			.field("public", &self.public)
			.finish()
	}
}
