// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wrapper for values that must never reach a log line.
//!
//! A tunnel session handles three kinds of sensitive data: the gateway auth
//! token, the ephemeral private key and the engine configuration blob (which
//! embeds the private key). All of them are carried as [`Secret<T>`] so that
//! `Debug`, `Display`, serde output and `tracing` fields print `[REDACTED]`.
//!
//! ```
//! use wgpin_common_secret::SecretString;
//!
//! let token = SecretString::new("pt-0123456789".to_string());
//! assert_eq!(format!("{token}"), "[REDACTED]");
//! assert_eq!(token.expose(), "pt-0123456789");
//! ```

use std::fmt;
use zeroize::Zeroize;

/// The placeholder printed instead of a secret value.
pub const REDACTED: &str = "[REDACTED]";

/// A sensitive value. Zeroed on drop; read only through [`Secret::expose`].
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

pub type SecretString = Secret<String>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Access the wrapped value. Every call site is a place where the secret
	/// leaves the wrapper, so keep them few.
	pub fn expose(&self) -> &T {
		&self.inner
	}
}

impl SecretString {
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

#[cfg(feature = "serde")]
mod serde_impl {
	use super::{Secret, REDACTED};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use zeroize::Zeroize;

	impl<T> Serialize for Secret<T>
	where
		T: Serialize + Zeroize,
	{
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			serializer.serialize_str(REDACTED)
		}
	}

	impl<'de, T> Deserialize<'de> for Secret<T>
	where
		T: Deserialize<'de> + Zeroize,
	{
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: Deserializer<'de>,
		{
			T::deserialize(deserializer).map(Secret::new)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn auth_token_debug_is_redacted() {
		let token = SecretString::from("pt-abcdef0123456789");
		let debug = format!("{token:?}");
		assert_eq!(debug, "Secret(\"[REDACTED]\")");
		assert!(!debug.contains("pt-abcdef"));
	}

	#[test]
	fn auth_token_display_is_redacted() {
		let token = SecretString::from("pt-abcdef0123456789");
		assert_eq!(token.to_string(), REDACTED);
	}

	#[test]
	fn redaction_survives_option_wrapping() {
		let token: Option<SecretString> = Some("pt-in-an-option".into());
		let debug = format!("{token:?}");
		assert!(debug.contains(REDACTED));
		assert!(!debug.contains("pt-in-an-option"));
	}

	#[test]
	fn clone_and_eq_compare_inner_values() {
		let a = SecretString::from("same");
		let b = a.clone();
		assert_eq!(a, b);
		assert_ne!(a, SecretString::from("different"));
	}

	#[test]
	fn empty_token_is_detected() {
		assert!(SecretString::from("").is_empty());
		assert!(!SecretString::from("x").is_empty());
	}

	#[cfg(feature = "serde")]
	#[test]
	fn serialize_writes_placeholder() {
		let token = SecretString::from("pt-serialized");
		let json = serde_json::to_string(&token).unwrap();
		assert_eq!(json, "\"[REDACTED]\"");
	}

	#[cfg(feature = "serde")]
	#[test]
	fn deserialize_keeps_value() {
		let token: SecretString = serde_json::from_str("\"pt-from-config\"").unwrap();
		assert_eq!(token.expose(), "pt-from-config");
	}

	proptest! {
		#[test]
		fn formatting_never_leaks(inner in "[a-zA-Z0-9_-]{6,48}") {
			prop_assume!(!inner.contains("REDACTED"));
			prop_assume!(!inner.contains("Secret"));

			let secret = SecretString::new(inner.clone());
			let debug_out = format!("{secret:?}");
			let display_out = format!("{secret}");
			prop_assert!(!debug_out.contains(&inner));
			prop_assert!(!display_out.contains(&inner));
		}
	}
}
