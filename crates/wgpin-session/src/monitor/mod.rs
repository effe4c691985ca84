// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Supervisory signals for a running session.
//!
//! Each monitor runs on its own task and only reports; the controller
//! decides what to do with a [`SupervisorEvent`].

pub mod liveness;
pub mod path;

pub use crate::state::SupervisorEvent;
pub use liveness::{IcmpProbe, LivenessProbe, LivenessProber};
pub use path::{InterfaceAddressSource, PathMonitor, PathSnapshot, PathSource};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The monitor tasks of one attempt, stopped together.
#[derive(Debug, Default)]
pub struct MonitorSet {
	cancel: CancellationToken,
	tasks: Vec<JoinHandle<()>>,
}

impl MonitorSet {
	pub fn new(cancel: CancellationToken) -> Self {
		Self {
			cancel,
			tasks: Vec::new(),
		}
	}

	pub fn push(&mut self, task: JoinHandle<()>) {
		self.tasks.push(task);
	}

	pub(crate) fn len(&self) -> usize {
		self.tasks.len()
	}

	/// Cancels every monitor and waits for the tasks to exit.
	pub async fn stop(&mut self) {
		self.cancel.cancel();
		for task in self.tasks.drain(..) {
			if let Err(e) = task.await {
				debug!(error = %e, "monitor task ended abnormally");
			}
		}
	}
}
