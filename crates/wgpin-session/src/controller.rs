// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The session controller.
//!
//! One controller drives one attempt: it owns the state machine, the key
//! pair and every resource the attempt acquires, and it is the only place
//! that mutates them. Collaborators report back by returning from awaited
//! calls (bootstrap) or through the supervisor channel (monitors). A new
//! attempt needs a new controller.

use crate::config::SessionConfiguration;
use crate::engine::{self, EngineHandle, TunnelEngine, TunnelEngineLauncher};
use crate::error::{Result, SessionError};
use crate::interface::{InterfaceLocator, TunnelDescriptor};
use crate::monitor::{LivenessProbe, LivenessProber, MonitorSet, PathMonitor, PathSource};
use crate::network_settings::{NetworkSettingsApplier, TunnelNetworkSettings};
use crate::registration::{RegistrationClient, RegistrationRequest, TransportStrategy};
use crate::response;
use crate::state::{AbortReason, AttemptId, SessionState, StateMachine, SupervisorEvent};
use std::net::IpAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use wgpin_wg_common::{WgKeyPair, WgPublicKey};

const EVENT_CHANNEL_CAPACITY: usize = 32;

static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

/// The host-side and OS-side pieces a session is assembled from.
pub struct Collaborators {
	pub transport: Arc<dyn TransportStrategy>,
	pub network: Arc<dyn NetworkSettingsApplier>,
	pub locator: InterfaceLocator,
	pub engine: Arc<dyn TunnelEngine>,
	/// No path monitoring when `None`.
	pub path_source: Option<Arc<dyn PathSource>>,
	/// No liveness probing when `None`.
	pub liveness_probe: Option<Arc<dyn LivenessProbe>>,
}

/// What the attempt has acquired so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelSession {
	pub public_key: Option<WgPublicKey>,
	pub server_ip: Option<IpAddr>,
	pub interface_fd: Option<RawFd>,
	pub interface_name: Option<String>,
	pub engine_handle: Option<EngineHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
	/// The body of an accepted registration; the session is `Registered`.
	Accepted(Vec<u8>),
	/// The registration failed for the current attempt.
	Failed(SessionError),
	/// Stale or late: a different attempt, or the session is no longer
	/// waiting on a registration. Nothing changed.
	Ignored,
}

/// Asks a controller to stop from outside its task.
#[derive(Debug, Clone)]
pub struct StopHandle {
	tx: mpsc::UnboundedSender<AbortReason>,
	cancel: CancellationToken,
}

impl StopHandle {
	pub fn stop(&self, reason: AbortReason) {
		let _ = self.tx.send(reason);
		self.cancel.cancel();
	}

	/// The host's `stopTunnel`.
	pub fn request_stop(&self) {
		self.stop(AbortReason::HostRequested);
	}
}

pub struct SessionController {
	config: SessionConfiguration,
	collaborators: Collaborators,
	launcher: TunnelEngineLauncher,
	attempt: AttemptId,
	machine: StateMachine,
	cancel: CancellationToken,
	keypair: Option<WgKeyPair>,
	session: TunnelSession,
	descriptor: Option<TunnelDescriptor>,
	settings_applied: bool,
	monitors: MonitorSet,
	consecutive_failures: u32,
	events_tx: mpsc::Sender<SupervisorEvent>,
	events_rx: mpsc::Receiver<SupervisorEvent>,
	stop_tx: mpsc::UnboundedSender<AbortReason>,
	stop_rx: mpsc::UnboundedReceiver<AbortReason>,
}

impl SessionController {
	pub fn new(config: SessionConfiguration, collaborators: Collaborators) -> Self {
		let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
		let (stop_tx, stop_rx) = mpsc::unbounded_channel();
		let launcher = TunnelEngineLauncher::new(Arc::clone(&collaborators.engine));

		Self {
			config,
			collaborators,
			launcher,
			attempt: AttemptId(NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed)),
			machine: StateMachine::new(),
			cancel: CancellationToken::new(),
			keypair: None,
			session: TunnelSession::default(),
			descriptor: None,
			settings_applied: false,
			monitors: MonitorSet::default(),
			consecutive_failures: 0,
			events_tx,
			events_rx,
			stop_tx,
			stop_rx,
		}
	}

	pub fn attempt(&self) -> AttemptId {
		self.attempt
	}

	pub fn state(&self) -> &SessionState {
		self.machine.current()
	}

	pub fn session(&self) -> &TunnelSession {
		&self.session
	}

	pub fn config(&self) -> &SessionConfiguration {
		&self.config
	}

	pub fn stop_handle(&self) -> StopHandle {
		StopHandle {
			tx: self.stop_tx.clone(),
			cancel: self.cancel.clone(),
		}
	}

	/// Sender for supervisory events, for hosts that observe the network
	/// themselves instead of through the built-in monitors.
	pub fn event_sender(&self) -> mpsc::Sender<SupervisorEvent> {
		self.events_tx.clone()
	}

	/// Runs the bootstrap sequence up to `Running`.
	///
	/// On failure every resource acquired so far is torn down and the
	/// session is left in `Aborted`; the returned reason is the one it
	/// aborted with.
	#[instrument(skip(self), fields(attempt = %self.attempt))]
	pub async fn start(&mut self) -> std::result::Result<(), AbortReason> {
		match self.bootstrap().await {
			Ok(()) => {
				info!(
					interface = self.session.interface_name.as_deref().unwrap_or_default(),
					"session running"
				);
				Ok(())
			}
			Err(reason) => {
				self.stop(reason).await;
				Err(self.abort_reason())
			}
		}
	}

	async fn bootstrap(&mut self) -> std::result::Result<(), AbortReason> {
		let keypair = WgKeyPair::generate().map_err(SessionError::from)?;
		let public_key = *keypair.public_key();
		info!(%public_key, "generated session key pair");
		self.keypair = Some(keypair);
		self.session.public_key = Some(public_key);
		self.step(SessionState::KeysGenerated)?;
		self.check_stop()?;

		let request = RegistrationRequest::new(&self.config, &public_key)?;
		let client = RegistrationClient::new(
			Arc::clone(&self.collaborators.transport),
			self.config.retry.clone(),
		);
		self.step(SessionState::RegistrationInFlight)?;

		let attempt = self.attempt;
		let body = match client.register(&request, &self.cancel).await {
			None => return Err(self.requested_reason()),
			Some(result) => match self.accept_registration(attempt, result) {
				RegistrationOutcome::Accepted(body) => body,
				RegistrationOutcome::Failed(err) => return Err(err.into()),
				RegistrationOutcome::Ignored => return Err(self.abort_reason()),
			},
		};
		self.check_stop()?;

		let response = response::parse(&body, &public_key)?;
		info!(server_ip = %response.server_ip, "gateway response parsed");
		self.session.server_ip = response.server_ip_addr();
		self.step(SessionState::ResponseParsed)?;

		let settings = TunnelNetworkSettings::derive(&response, &self.config)?;
		self.collaborators.network.apply(&settings).await?;
		self.settings_applied = true;
		self.step(SessionState::NetworkSettingsApplied)?;
		self.check_stop()?;

		let descriptor = self.collaborators.locator.locate_control_interface()?;
		let fd = descriptor.fd();
		let name = self.collaborators.locator.interface_name(&descriptor);
		info!(fd, interface = %name, "bound tunnel interface");
		self.descriptor = Some(descriptor);
		self.session.interface_fd = Some(fd);
		self.session.interface_name = Some(name);
		self.step(SessionState::InterfaceBound)?;

		let peer = engine::peer_from_response(&response)?;
		let keypair = self
			.keypair
			.as_ref()
			.ok_or_else(|| SessionError::CryptoFailure("key pair missing".into()))?;
		let handle = self.launcher.start(keypair, &peer, fd)?;
		self.session.engine_handle = Some(handle);
		self.step(SessionState::EngineStarted)?;
		self.check_stop()?;

		self.start_monitors();
		self.step(SessionState::Running)?;
		Ok(())
	}

	/// Delivers a registration result.
	///
	/// Only the current attempt, while it is `RegistrationInFlight`, can
	/// move the session; anything else is dropped without side effects.
	pub fn accept_registration(
		&mut self,
		attempt: AttemptId,
		result: Result<Vec<u8>>,
	) -> RegistrationOutcome {
		if attempt != self.attempt {
			debug!(%attempt, current = %self.attempt, "ignoring registration from another attempt");
			return RegistrationOutcome::Ignored;
		}
		if self.machine.current() != &SessionState::RegistrationInFlight {
			debug!(state = self.machine.current().name(), "ignoring late registration result");
			return RegistrationOutcome::Ignored;
		}

		match result {
			Ok(body) => match self.machine.advance(SessionState::Registered) {
				Ok(()) => RegistrationOutcome::Accepted(body),
				Err(_) => RegistrationOutcome::Ignored,
			},
			Err(err) => RegistrationOutcome::Failed(err),
		}
	}

	/// Applies the supervision policy to one event. Returns the reason when
	/// the event ended the session.
	pub async fn handle_event(&mut self, event: SupervisorEvent) -> Option<AbortReason> {
		if self.machine.current() != &SessionState::Running {
			debug!(
				state = self.machine.current().name(),
				?event,
				"ignoring supervisor event outside running"
			);
			return None;
		}

		match event {
			SupervisorEvent::Reachable { rtt } => {
				if self.consecutive_failures > 0 {
					info!(
						rtt_ms = rtt.as_millis() as u64,
						after = self.consecutive_failures,
						"gateway reachable again"
					);
				}
				self.consecutive_failures = 0;
				None
			}
			SupervisorEvent::Unreachable { cause } => {
				self.consecutive_failures += 1;
				warn!(
					%cause,
					consecutive = self.consecutive_failures,
					threshold = self.config.liveness_failure_threshold,
					"gateway unreachable"
				);
				if self.consecutive_failures < self.config.liveness_failure_threshold {
					return None;
				}
				let reason = AbortReason::LivenessLost {
					consecutive_failures: self.consecutive_failures,
				};
				self.stop(reason.clone()).await;
				Some(reason)
			}
			SupervisorEvent::PathChanged { description } => {
				warn!(%description, "network path changed under running session");
				if !self.config.restart_on_path_change {
					return None;
				}
				self.stop(AbortReason::PathChanged).await;
				Some(AbortReason::PathChanged)
			}
		}
	}

	/// Processes supervisor events and stop requests until the session
	/// ends, and returns why it ended.
	#[instrument(skip(self), fields(attempt = %self.attempt))]
	pub async fn supervise(&mut self) -> AbortReason {
		loop {
			if let SessionState::Aborted(reason) = self.machine.current() {
				return reason.clone();
			}

			tokio::select! {
				biased;

				reason = self.stop_rx.recv() => {
					let reason = reason.unwrap_or(AbortReason::HostRequested);
					self.stop(reason).await;
				}

				Some(event) = self.events_rx.recv() => {
					self.handle_event(event).await;
				}
			}
		}
	}

	/// Tears the attempt down and moves it to `Aborted(reason)`.
	///
	/// Order: monitors, engine, descriptor, network settings. The
	/// descriptor is released only once the engine is off. Calling this on
	/// a stopped session does nothing.
	#[instrument(skip(self, reason), fields(attempt = %self.attempt, state = self.machine.current().name()))]
	pub async fn stop(&mut self, reason: AbortReason) {
		if self.machine.current().is_terminal() {
			debug!(%reason, "session already stopped");
			return;
		}

		self.cancel.cancel();
		self.monitors.stop().await;

		if let Some(handle) = self.session.engine_handle.take() {
			self.launcher.stop(handle);
		}

		if let Some(mut descriptor) = self.descriptor.take() {
			descriptor.release();
		}

		if self.settings_applied {
			self.settings_applied = false;
			if let Err(e) = self.collaborators.network.clear().await {
				warn!(error = %e, "failed to clear network settings");
			}
		}

		self.keypair = None;

		match &reason {
			AbortReason::Failed(err) => error!(kind = err.kind(), error = %err, "session aborted"),
			other => info!(reason = %other, "session stopped"),
		}

		if let Err(rejected) = self.machine.advance(SessionState::Aborted(reason)) {
			warn!(from = rejected.from.name(), "abort transition rejected");
		}
	}

	fn start_monitors(&mut self) {
		let token = self.cancel.child_token();
		let mut monitors = MonitorSet::new(token.clone());

		if let Some(source) = &self.collaborators.path_source {
			let monitor = PathMonitor::new(Arc::clone(source), self.config.path_poll_interval);
			monitors.push(monitor.spawn(self.events_tx.clone(), token.clone()));
		}
		if let Some(probe) = &self.collaborators.liveness_probe {
			let prober = LivenessProber::new(Arc::clone(probe), self.config.ping_interval);
			monitors.push(prober.spawn(self.events_tx.clone(), token.clone()));
		}

		debug!(count = monitors.len(), "supervisory monitors started");
		self.monitors = monitors;
	}

	fn step(&mut self, to: SessionState) -> std::result::Result<(), AbortReason> {
		self.machine.advance(to).map_err(|rejected| {
			error!(
				from = rejected.from.name(),
				to = rejected.to.name(),
				"unexpected state transition"
			);
			self.abort_reason()
		})
	}

	fn check_stop(&mut self) -> std::result::Result<(), AbortReason> {
		if self.cancel.is_cancelled() {
			return Err(self.requested_reason());
		}
		Ok(())
	}

	fn requested_reason(&mut self) -> AbortReason {
		self.stop_rx.try_recv().unwrap_or(AbortReason::HostRequested)
	}

	fn abort_reason(&self) -> AbortReason {
		match self.machine.current() {
			SessionState::Aborted(reason) => reason.clone(),
			_ => AbortReason::HostRequested,
		}
	}
}

impl std::fmt::Debug for SessionController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionController")
			.field("attempt", &self.attempt)
			.field("state", self.machine.current())
			.field("session", &self.session)
			.field("monitors", &self.monitors.len())
			.finish_non_exhaustive()
	}
}
