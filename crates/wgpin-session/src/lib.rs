// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session establishment for a certificate-pinned WireGuard tunnel.
//!
//! # Overview
//!
//! A [`SessionController`] walks one attempt through:
//! 1. Generating an ephemeral WireGuard key pair
//! 2. Registering the public key with the gateway over TLS pinned to a
//!    bundled anchor certificate
//! 3. Parsing the gateway's JSON reply (`server_ip` is required)
//! 4. Handing the derived network settings to the host
//! 5. Locating the tunnel interface descriptor the host created
//! 6. Starting the tunnel engine with a UAPI configuration and that descriptor
//! 7. Supervising the running tunnel with path and liveness monitors
//!
//! Any failure moves the attempt to `Aborted(reason)` and releases what
//! it had acquired.
//!
//! # Example
//!
//! ```ignore
//! use wgpin_session::{Collaborators, SessionController, SessionSettings};
//!
//! let config = SessionSettings::from_file(path)?.validate()?;
//! let mut controller = SessionController::new(config, collaborators);
//! controller.start().await?;
//! let reason = controller.supervise().await;
//! ```

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod interface;
pub mod monitor;
pub mod network_settings;
pub mod registration;
pub mod response;
pub mod state;
pub mod trust;

pub use config::{SessionConfiguration, SessionSettings, TransportKind};
pub use controller::{
	Collaborators, RegistrationOutcome, SessionController, StopHandle, TunnelSession,
};
pub use engine::{EngineHandle, TunnelEngine, TunnelEngineLauncher};
pub use error::{Result, SessionError};
pub use interface::{
	DescriptorProbe, DescriptorTable, InterfaceLocator, TunnelDescriptor, DESCRIPTOR_SCAN_LIMIT,
};
pub use monitor::{
	IcmpProbe, InterfaceAddressSource, LivenessProbe, LivenessProber, PathMonitor, PathSnapshot,
	PathSource,
};
pub use network_settings::{NetworkSettingsApplier, TunnelNetworkSettings};
pub use registration::{
	transport_for, HttpTransport, PinnedTransport, RegistrationClient, RegistrationRequest,
	TransportStrategy,
};
pub use response::ServerResponse;
pub use state::{AbortReason, AttemptId, SessionState, StateMachine, SupervisorEvent};
pub use trust::{TrustAnchor, TrustEvaluator};

#[cfg(feature = "wireguard-go")]
pub use engine::WireGuardGo;
