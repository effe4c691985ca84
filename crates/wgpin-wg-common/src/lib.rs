// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard primitives shared by the session core and the CLI.

pub mod keys;
pub mod peer;

pub use ipnet::IpNet as IpAddressRange;
pub use keys::{KeyError, WgKeyPair, WgPresharedKey, WgPrivateKey, WgPublicKey, KEY_LENGTH};
pub use peer::{Endpoint, EndpointHost, EndpointParseError, PeerConfiguration};
