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

use super::{end_of_stream, ReadBatch, StreamBatch, WriteBatch};
use crate::prelude::*;
use std::io;
use tokio::sync::mpsc;

/// Maximum number of queued batches merged into one read.
const MAX_MERGED_BATCHES: usize = 16;

/// Create an in-memory pipe that can hold at most `capacity` pending batches.
///
/// Batches written into the [`PipeWriter`] come out of the [`PipeReader`]
/// in the same order. Dropping or closing the writer ends the stream.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeReader, PipeWriter) {
	let (tx, rx) = mpsc::channel(std::cmp::max(capacity, 1));
	(PipeReader { rx }, PipeWriter { tx: Some(tx) })
}

pub struct PipeReader {
	rx: mpsc::Receiver<StreamBatch>,
}

#[async_trait]
impl ReadBatch for PipeReader {
	async fn read_batch(&mut self) -> io::Result<StreamBatch> {
		let mut batch = self.rx.recv().await.ok_or_else(end_of_stream)?;
		for _ in 0..MAX_MERGED_BATCHES {
			match self.rx.try_recv() {
				Ok(more) => batch.append(more),
				Err(_) => break,
			}
		}
		Ok(batch)
	}

	fn interrupt(&mut self) {
		self.rx.close();
	}
}

pub struct PipeWriter {
	tx: Option<mpsc::Sender<StreamBatch>>,
}

impl PipeWriter {
	fn sender(&self) -> io::Result<&mpsc::Sender<StreamBatch>> {
		self.tx
			.as_ref()
			.ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
	}
}

#[async_trait]
impl WriteBatch for PipeWriter {
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		if batch.is_empty() {
			return Ok(());
		}
		self.sender()?
			.send(batch)
			.await
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))
	}

	async fn close(&mut self) -> io::Result<()> {
		self.tx = None;
		Ok(())
	}

	fn interrupt(&mut self) {
		self.tx = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buf::is_end_of_stream;

	#[test]
	fn test_pipe_order_and_close() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (mut r, mut w) = pipe(8);
			w.write_batch(StreamBatch::from(&b"12"[..])).await.unwrap();
			w.write_batch(StreamBatch::new()).await.unwrap();
			w.write_batch(StreamBatch::from(&b"345"[..])).await.unwrap();
			w.close().await.unwrap();

			let mut output = Vec::new();
			let err = loop {
				match r.read_batch().await {
					Ok(b) => output.extend_from_slice(&b.contiguous()),
					Err(e) => break e,
				}
			};
			assert!(is_end_of_stream(&err));
			assert_eq!(output, b"12345");
			assert!(w.write_batch(StreamBatch::from(&b"6"[..])).await.is_err());
		});
	}

	#[test]
	fn test_pipe_interrupted_reader() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (mut r, mut w) = pipe(1);
			r.interrupt();
			let err = w
				.write_batch(StreamBatch::from(&b"x"[..]))
				.await
				.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
		});
	}
}
