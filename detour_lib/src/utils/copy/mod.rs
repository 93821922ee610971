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

/*!
Batch copy loops.

[`copy`] moves batches from a [`ReadBatch`] into a [`WriteBatch`] until the
source ends. [`smart_copy`] does the same while looking for an embedded
SOCKS5 `CONNECT` request whose domain is blocked.
*/

mod activity;
mod atomic_values;
pub mod smart;

pub use activity::ActivityTimer;
pub use atomic_values::{Counter, RefCount, Switch};
pub use smart::{smart_copy, Outcome};

use crate::buf::{is_end_of_stream, ReadBatch, StreamBatch, WriteBatch};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("read error ({0})")]
	Read(io::Error),
	#[error("write error ({0})")]
	Write(io::Error),
}

impl Error {
	#[inline]
	#[must_use]
	pub fn io(&self) -> &io::Error {
		match self {
			Error::Read(e) | Error::Write(e) => e,
		}
	}
}

type Observer = Box<dyn Fn(&StreamBatch) + Send + Sync>;

/// Observers called on every non-empty batch before it is written.
///
/// Observers run in the order they were added.
#[derive(Default)]
pub struct CopyHandler {
	observers: Vec<Observer>,
}

impl CopyHandler {
	#[inline]
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Reset `timer` on every transfer.
	#[must_use]
	pub fn update_activity(mut self, timer: &ActivityTimer) -> Self {
		let timer = timer.clone();
		self.observers.push(Box::new(move |_| timer.update()));
		self
	}

	/// Add the size of every transfer into `counter`.
	#[must_use]
	pub fn count_size(mut self, counter: &Counter) -> Self {
		let counter = counter.clone();
		self.observers.push(Box::new(move |b| {
			counter.add(b.len() as u64);
		}));
		self
	}

	#[inline]
	pub(crate) fn observe(&self, batch: &StreamBatch) {
		for f in &self.observers {
			f(batch);
		}
	}
}

/// Copy every batch from `reader` into `writer`.
///
/// Returns `Ok` when `reader` reaches a clean end of stream.
/// The writer is not closed.
///
/// # Errors
///
/// Returns [`Error::Read`] if reading fails for any other reason,
/// or [`Error::Write`] if writing fails.
pub async fn copy<R, W>(reader: &mut R, writer: &mut W, handler: &CopyHandler) -> Result<(), Error>
where
	R: ReadBatch + ?Sized,
	W: WriteBatch + ?Sized,
{
	loop {
		let batch = match read_next(reader).await? {
			Some(b) => b,
			None => return Ok(()),
		};
		forward(writer, batch, handler).await?;
	}
}

/// Read the next batch. `Ok(None)` means the stream ended normally.
pub(crate) async fn read_next<R>(reader: &mut R) -> Result<Option<StreamBatch>, Error>
where
	R: ReadBatch + ?Sized,
{
	match reader.read_batch().await {
		Ok(b) => Ok(Some(b)),
		Err(e) if is_end_of_stream(&e) => Ok(None),
		Err(e) => Err(Error::Read(e)),
	}
}

/// Observe and write a batch. Empty batches are skipped.
pub(crate) async fn forward<W>(
	writer: &mut W,
	batch: StreamBatch,
	handler: &CopyHandler,
) -> Result<(), Error>
where
	W: WriteBatch + ?Sized,
{
	if batch.is_empty() {
		return Ok(());
	}
	handler.observe(&batch);
	writer.write_batch(batch).await.map_err(Error::Write)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{BatchRecorder, ScriptedReader};
	use std::time::Duration;

	#[test]
	fn test_copy_passthrough() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let mut reader = ScriptedReader::new(vec![
				Ok(b"abc".to_vec()),
				Ok(Vec::new()),
				Ok(vec![5, 1, 0, 1]),
				Ok(b"xyz".to_vec()),
			]);
			let mut writer = BatchRecorder::default();
			let counter = Counter::new(0);
			let timer = ActivityTimer::new(Duration::from_secs(10));
			let handler = CopyHandler::new()
				.update_activity(&timer)
				.count_size(&counter);
			copy(&mut reader, &mut writer, &handler).await.unwrap();
			assert_eq!(writer.concat(), b"abc\x05\x01\x00\x01xyz");
			// Empty batches are never written.
			assert_eq!(writer.batches.len(), 3);
			assert_eq!(counter.get(), 10);
		});
	}

	#[test]
	fn test_copy_read_error() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let mut reader = ScriptedReader::new(vec![
				Ok(b"abc".to_vec()),
				Err(io::ErrorKind::ConnectionReset),
			]);
			let mut writer = BatchRecorder::default();
			let err = copy(&mut reader, &mut writer, &CopyHandler::new())
				.await
				.unwrap_err();
			assert!(matches!(err, Error::Read(_)));
			assert_eq!(err.io().kind(), io::ErrorKind::ConnectionReset);
			assert_eq!(writer.concat(), b"abc");
		});
	}

	#[test]
	fn test_copy_write_error() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let mut reader = ScriptedReader::new(vec![Ok(b"abc".to_vec()), Ok(b"def".to_vec())]);
			let mut writer = BatchRecorder::failing_after(1);
			let counter = Counter::new(0);
			let err = copy(&mut reader, &mut writer, &CopyHandler::new().count_size(&counter))
				.await
				.unwrap_err();
			assert!(matches!(err, Error::Write(_)));
			assert_eq!(writer.concat(), b"abc");
		});
	}
}
