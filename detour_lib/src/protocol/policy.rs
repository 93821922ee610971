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

use crate::server::BuildError;
use std::{borrow::Cow, collections::HashMap, time::Duration};

const fn default_idle_timeout_secs() -> u64 {
	300
}

const fn default_downlink_only_secs() -> u64 {
	1
}

const fn default_uplink_only_secs() -> u64 {
	1
}

const fn default_buffer_size() -> usize {
	16 * 1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
	/// Session is dropped after this long without any transfer.
	pub connection_idle: Duration,
	/// Grace period once the client side has nothing more to send.
	pub downlink_only: Duration,
	/// Grace period once the remote side has nothing more to send.
	pub uplink_only: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
	/// Maximum number of bytes read from a connection at a time.
	pub per_connection: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
	pub timeouts: Timeouts,
	pub buffer: BufferPolicy,
}

impl Default for SessionPolicy {
	fn default() -> Self {
		Self {
			timeouts: Timeouts {
				connection_idle: Duration::from_secs(default_idle_timeout_secs()),
				downlink_only: Duration::from_secs(default_downlink_only_secs()),
				uplink_only: Duration::from_secs(default_uplink_only_secs()),
			},
			buffer: BufferPolicy {
				per_connection: default_buffer_size(),
			},
		}
	}
}

/// Source of session policies by user level.
pub trait PolicyProvider: Send + Sync {
	fn for_level(&self, level: u32) -> SessionPolicy;
}

/// Policies fixed at start up.
#[derive(Debug, Default, Clone)]
pub struct StaticPolicy {
	default: SessionPolicy,
	levels: HashMap<u32, SessionPolicy>,
}

impl PolicyProvider for StaticPolicy {
	fn for_level(&self, level: u32) -> SessionPolicy {
		self.levels.get(&level).copied().unwrap_or(self.default)
	}
}

#[derive(Debug)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct Builder {
	/// Default: 300
	#[cfg_attr(feature = "use_serde", serde(default = "default_idle_timeout_secs"))]
	pub idle_timeout_secs: u64,
	/// Default: 1
	#[cfg_attr(feature = "use_serde", serde(default = "default_downlink_only_secs"))]
	pub downlink_only_secs: u64,
	/// Default: 1
	#[cfg_attr(feature = "use_serde", serde(default = "default_uplink_only_secs"))]
	pub uplink_only_secs: u64,
	/// Default: 16384
	#[cfg_attr(feature = "use_serde", serde(default = "default_buffer_size"))]
	pub buffer_size: usize,
	/// Overrides for specific user levels.
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub levels: Vec<LevelBuilder>,
}

/// Fields left empty are taken from the default policy.
#[derive(Debug, Default)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct LevelBuilder {
	pub level: u32,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub idle_timeout_secs: Option<u64>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub downlink_only_secs: Option<u64>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub uplink_only_secs: Option<u64>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub buffer_size: Option<usize>,
}

impl Builder {
	/// Create a [`StaticPolicy`].
	///
	/// # Errors
	///
	/// Returns [`BuildError::ValueIsZero`] if an idle timeout or a buffer size is zero,
	/// and [`BuildError::Policy`] if a level is configured more than once.
	pub fn build(&self) -> Result<StaticPolicy, BuildError> {
		let default = make_policy(
			self.idle_timeout_secs,
			self.downlink_only_secs,
			self.uplink_only_secs,
			self.buffer_size,
		)?;
		let mut levels = HashMap::with_capacity(self.levels.len());
		for lb in &self.levels {
			let policy = make_policy(
				lb.idle_timeout_secs.unwrap_or(self.idle_timeout_secs),
				lb.downlink_only_secs.unwrap_or(self.downlink_only_secs),
				lb.uplink_only_secs.unwrap_or(self.uplink_only_secs),
				lb.buffer_size.unwrap_or(self.buffer_size),
			)?;
			if levels.insert(lb.level, policy).is_some() {
				return Err(BuildError::Policy(
					format!("level {} is defined more than once", lb.level).into(),
				));
			}
		}
		Ok(StaticPolicy { default, levels })
	}
}

impl Default for Builder {
	fn default() -> Self {
		Self {
			idle_timeout_secs: default_idle_timeout_secs(),
			downlink_only_secs: default_downlink_only_secs(),
			uplink_only_secs: default_uplink_only_secs(),
			buffer_size: default_buffer_size(),
			levels: Vec::new(),
		}
	}
}

fn make_policy(
	idle_secs: u64,
	downlink_secs: u64,
	uplink_secs: u64,
	buffer_size: usize,
) -> Result<SessionPolicy, BuildError> {
	if idle_secs == 0 {
		return Err(BuildError::ValueIsZero(Cow::Borrowed("idle_timeout_secs")));
	}
	if buffer_size == 0 {
		return Err(BuildError::ValueIsZero(Cow::Borrowed("buffer_size")));
	}
	Ok(SessionPolicy {
		timeouts: Timeouts {
			connection_idle: Duration::from_secs(idle_secs),
			downlink_only: Duration::from_secs(downlink_secs),
			uplink_only: Duration::from_secs(uplink_secs),
		},
		buffer: BufferPolicy {
			per_connection: buffer_size,
		},
	})
}
