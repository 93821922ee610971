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

use super::Switch;
use futures::{pin_mut, FutureExt};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

const ACTIVE: bool = true;
const NOT_ACTIVE: bool = !ACTIVE;

/// Idle timer shared by every copy loop of a session.
///
/// The timer expires when no [`update`](Self::update) happened during a
/// whole timeout period. Changing the timeout restarts the period.
#[derive(Clone)]
pub struct ActivityTimer {
	is_active: Switch,
	timeout: Arc<watch::Sender<Duration>>,
}

impl ActivityTimer {
	#[must_use]
	pub fn new(timeout: Duration) -> Self {
		let (tx, _) = watch::channel(timeout);
		Self {
			is_active: Switch::new(ACTIVE),
			timeout: Arc::new(tx),
		}
	}

	/// Mark the session as active.
	#[inline]
	pub fn update(&self) {
		self.is_active.set(ACTIVE);
	}

	/// Replace the idle timeout. A zero timeout expires the timer at once.
	pub fn set_timeout(&self, timeout: Duration) {
		self.update();
		self.timeout.send_replace(timeout);
	}

	#[must_use]
	pub fn timeout(&self) -> Duration {
		*self.timeout.borrow()
	}

	/// Wait until the timer expires.
	pub async fn wait_expired(&self) {
		let mut rx = self.timeout.subscribe();
		loop {
			let timeout = *rx.borrow_and_update();
			if timeout.is_zero() {
				return;
			}
			let timeout_changed = {
				let sleep = tokio::time::sleep(timeout).fuse();
				let changed = rx.changed().fuse();
				pin_mut!(sleep, changed);
				#[allow(clippy::mut_mut)]
				{
					futures::select! {
						_ = sleep => false,
						res = changed => res.is_ok(),
					}
				}
			};
			if !timeout_changed && self.is_active.fetch_and_set(NOT_ACTIVE) == NOT_ACTIVE {
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Instant;

	#[test]
	fn test_timer_expires_when_idle() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let timer = ActivityTimer::new(Duration::from_millis(50));
			let start = Instant::now();
			timer.wait_expired().await;
			// One period to consume the initial activity, one more to expire.
			assert!(start.elapsed() >= Duration::from_millis(100));
		});
	}

	#[test]
	fn test_timer_reset_by_update() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let timer = ActivityTimer::new(Duration::from_millis(100));
			let updater = {
				let timer = timer.clone();
				async move {
					for _ in 0..6 {
						tokio::time::sleep(Duration::from_millis(50)).await;
						timer.update();
					}
				}
			};
			let start = Instant::now();
			futures::join!(timer.wait_expired(), updater);
			assert!(start.elapsed() >= Duration::from_millis(300));
		});
	}

	#[test]
	fn test_zero_timeout_expires_now() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let timer = ActivityTimer::new(Duration::from_secs(300));
			let waiter = {
				let timer = timer.clone();
				tokio::spawn(async move { timer.wait_expired().await })
			};
			tokio::time::sleep(Duration::from_millis(20)).await;
			timer.set_timeout(Duration::ZERO);
			tokio::time::timeout(Duration::from_secs(1), waiter)
				.await
				.unwrap()
				.unwrap();
		});
	}
}
