// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use reqwest::ClientBuilder;

/// Creates a client builder with the standard wgpin User-Agent header.
///
/// Callers finish the builder themselves because every gateway request needs
/// its own TLS configuration (see the pinned trust evaluator in
/// `wgpin-session`).
pub fn builder() -> ClientBuilder {
	reqwest::Client::builder().user_agent(user_agent())
}

/// Returns the User-Agent sent on gateway requests.
///
/// Format: `wgpin/{version}/{os}-{arch}`
pub fn user_agent() -> String {
	format!(
		"wgpin/{}/{}-{}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
