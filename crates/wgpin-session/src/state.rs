// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::SessionError;
use std::fmt;
use std::time::Duration;

/// Why a session ended up in [`SessionState::Aborted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
	Failed(SessionError),
	HostRequested,
	LivenessLost { consecutive_failures: u32 },
	PathChanged,
}

impl fmt::Display for AbortReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Failed(err) => write!(f, "{err}"),
			Self::HostRequested => f.write_str("stopped by host"),
			Self::LivenessLost {
				consecutive_failures,
			} => write!(f, "gateway unreachable after {consecutive_failures} probes"),
			Self::PathChanged => f.write_str("network path changed"),
		}
	}
}

impl std::error::Error for AbortReason {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Failed(err) => Some(err),
			_ => None,
		}
	}
}

impl From<SessionError> for AbortReason {
	fn from(err: SessionError) -> Self {
		Self::Failed(err)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
	Idle,
	KeysGenerated,
	RegistrationInFlight,
	Registered,
	ResponseParsed,
	NetworkSettingsApplied,
	InterfaceBound,
	EngineStarted,
	Running,
	Aborted(AbortReason),
}

impl SessionState {
	fn rank(&self) -> u8 {
		match self {
			Self::Idle => 0,
			Self::KeysGenerated => 1,
			Self::RegistrationInFlight => 2,
			Self::Registered => 3,
			Self::ResponseParsed => 4,
			Self::NetworkSettingsApplied => 5,
			Self::InterfaceBound => 6,
			Self::EngineStarted => 7,
			Self::Running => 8,
			Self::Aborted(_) => u8::MAX,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::KeysGenerated => "keys_generated",
			Self::RegistrationInFlight => "registration_in_flight",
			Self::Registered => "registered",
			Self::ResponseParsed => "response_parsed",
			Self::NetworkSettingsApplied => "network_settings_applied",
			Self::InterfaceBound => "interface_bound",
			Self::EngineStarted => "engine_started",
			Self::Running => "running",
			Self::Aborted(_) => "aborted",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Aborted(_))
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Aborted(reason) => write!(f, "aborted ({reason})"),
			other => f.write_str(other.name()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRejected {
	pub from: SessionState,
	pub to: SessionState,
}

/// Forward-only state holder for one attempt.
///
/// Success transitions must move exactly one step forward. `Aborted` is
/// reachable from every non-terminal state and nothing leaves it.
#[derive(Debug)]
pub struct StateMachine {
	state: SessionState,
}

impl Default for StateMachine {
	fn default() -> Self {
		Self::new()
	}
}

impl StateMachine {
	pub fn new() -> Self {
		Self {
			state: SessionState::Idle,
		}
	}

	pub fn current(&self) -> &SessionState {
		&self.state
	}

	pub fn advance(&mut self, to: SessionState) -> Result<(), TransitionRejected> {
		let allowed = match &to {
			SessionState::Aborted(_) => !self.state.is_terminal(),
			next => !self.state.is_terminal() && next.rank() == self.state.rank() + 1,
		};

		if !allowed {
			return Err(TransitionRejected {
				from: self.state.clone(),
				to,
			});
		}

		tracing::info!(from = self.state.name(), to = to.name(), "session state transition");
		self.state = to;
		Ok(())
	}
}

/// A fresh id per attempt; late completions from older attempts carry a
/// stale id and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "attempt-{}", self.0)
	}
}

/// Supervisory signal delivered to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
	PathChanged { description: String },
	Reachable { rtt: Duration },
	Unreachable { cause: String },
}
