/**********************************************************************

Copyright (C) 2021 by reddal

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

**********************************************************************/

use crate::prelude::*;
use num_enum::TryFromPrimitive;
use std::fmt;
use tokio::sync::watch;

/// Progress of the handshake replayed towards a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RelayStep {
	SendGreeting = 1,
	AwaitMethod = 2,
	SendConnect = 3,
	Steady = 4,
}

impl RelayStep {
	#[inline]
	#[must_use]
	pub fn next(self) -> Option<Self> {
		Self::try_from(self as u8 + 1).ok()
	}
}

impl fmt::Display for RelayStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			RelayStep::SendGreeting => "SEND_GREETING",
			RelayStep::AwaitMethod => "AWAIT_METHOD",
			RelayStep::SendConnect => "SEND_CONNECT",
			RelayStep::Steady => "STEADY",
		};
		write!(f, "{}({})", name, *self as u8)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayState {
	/// Set once the session has switched to the relay.
	pub target: Option<SocksAddr>,
	pub step: RelayStep,
	/// Set once the request direction has ended without a switch.
	pub request_finished: bool,
}

impl RelayState {
	#[inline]
	#[must_use]
	pub fn use_relay(&self) -> bool {
		self.target.is_some()
	}

	/// Whether the session will never switch, or already has.
	#[inline]
	#[must_use]
	pub fn is_settled(&self) -> bool {
		self.use_relay() || self.request_finished
	}
}

/// Relay state of a session, shared by both directions.
///
/// Every change wakes up all tasks waiting in [`wait_until`](Self::wait_until).
pub struct RelaySession {
	state: watch::Sender<RelayState>,
}

impl RelaySession {
	#[must_use]
	pub fn new() -> Self {
		let (state, _) = watch::channel(RelayState {
			target: None,
			step: RelayStep::SendGreeting,
			request_finished: false,
		});
		Self { state }
	}

	#[must_use]
	pub fn snapshot(&self) -> RelayState {
		self.state.borrow().clone()
	}

	#[inline]
	#[must_use]
	pub fn use_relay(&self) -> bool {
		self.state.borrow().use_relay()
	}

	/// Switch the session to the relay, asking for `target`.
	///
	/// Only the first call has any effect. Returns `true` if this call
	/// made the switch.
	pub fn switch_to_relay(&self, target: SocksAddr) -> bool {
		self.state.send_if_modified(move |state| {
			if state.is_settled() {
				return false;
			}
			state.target = Some(target);
			true
		})
	}

	/// Record that the request direction ended without switching.
	///
	/// Has no effect once the session has switched.
	pub fn finish_request(&self) {
		self.state.send_if_modified(|state| {
			if state.is_settled() {
				return false;
			}
			state.request_finished = true;
			true
		});
	}

	/// Move from step `from` to step `to`.
	///
	/// Returns `false` and changes nothing if the current step is not `from`.
	pub fn advance(&self, from: RelayStep, to: RelayStep) -> bool {
		self.state.send_if_modified(|state| {
			if state.step != from {
				return false;
			}
			state.step = to;
			true
		})
	}

	/// Wait until `pred` holds for the current state, and return that state.
	pub async fn wait_until<F>(&self, pred: F) -> RelayState
	where
		F: Fn(&RelayState) -> bool,
	{
		let mut rx = self.state.subscribe();
		loop {
			{
				let state = rx.borrow_and_update();
				if pred(&*state) {
					return (*state).clone();
				}
			}
			// Cannot fail while `self` holds the sender.
			if rx.changed().await.is_err() {
				return self.snapshot();
			}
		}
	}
}

impl Default for RelaySession {
	fn default() -> Self {
		Self::new()
	}
}
