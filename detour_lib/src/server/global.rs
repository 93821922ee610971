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

use super::BuildError;
use std::{borrow::Cow, time::Duration};

const fn default_dial_tcp_timeout_ms() -> u64 {
	10_000
}

pub struct Global {
	/// TCP connection will be dropped if it cannot be established within this amount of time.
	pub dial_tcp_timeout: Duration,
}

impl Default for Global {
	fn default() -> Self {
		Self {
			dial_tcp_timeout: Duration::from_millis(default_dial_tcp_timeout_ms()),
		}
	}
}

#[derive(Debug)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct Builder {
	/// TCP connection will be dropped if it cannot be established within
	/// this amount of time.
	///
	/// Default: 10000
	#[cfg_attr(feature = "use_serde", serde(default = "default_dial_tcp_timeout_ms"))]
	pub dial_tcp_timeout_ms: u64,
}

impl Builder {
	/// Creates a [`Global`].
	///
	/// # Errors
	///
	/// Returns [`BuildError::ValueIsZero`] if a timeout is zero.
	pub fn build(&self) -> Result<Global, BuildError> {
		check_zero(self.dial_tcp_timeout_ms, "dial_tcp_timeout_ms")?;
		Ok(Global {
			dial_tcp_timeout: Duration::from_millis(self.dial_tcp_timeout_ms),
		})
	}
}

impl Default for Builder {
	fn default() -> Self {
		Self {
			dial_tcp_timeout_ms: default_dial_tcp_timeout_ms(),
		}
	}
}

/// Returns Err([`BuildError::ValueIsZero`]) if `val` is zero.
#[inline]
fn check_zero(val: u64, val_name: &'static str) -> Result<u64, BuildError> {
	if val > 0 {
		Ok(val)
	} else {
		Err(BuildError::ValueIsZero(Cow::Borrowed(val_name)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_zero_dial_timeout() {
		let b = Builder {
			dial_tcp_timeout_ms: 0,
		};
		assert!(matches!(b.build(), Err(BuildError::ValueIsZero(_))));
		assert_eq!(
			Builder::default().build().unwrap().dial_tcp_timeout,
			Global::default().dial_tcp_timeout
		);
	}
}
