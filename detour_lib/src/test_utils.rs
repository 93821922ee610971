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

use crate::{
	buf::{end_of_stream, ReadBatch, StreamBatch, WriteBatch},
	prelude::*,
};
use parking_lot::Mutex;
use std::{collections::VecDeque, io};

pub fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// Reader that returns a fixed list of results, then end of stream.
pub struct ScriptedReader {
	script: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
}

impl ScriptedReader {
	pub fn new(script: Vec<Result<Vec<u8>, io::ErrorKind>>) -> Self {
		Self {
			script: script.into(),
		}
	}
}

#[async_trait]
impl ReadBatch for ScriptedReader {
	async fn read_batch(&mut self) -> io::Result<StreamBatch> {
		match self.script.pop_front() {
			Some(Ok(data)) => Ok(data.into()),
			Some(Err(kind)) => Err(kind.into()),
			None => Err(end_of_stream()),
		}
	}
}

/// Writer that records every batch it receives.
#[derive(Default)]
pub struct BatchRecorder {
	pub batches: Vec<Vec<u8>>,
	pub closed: bool,
	fail_after: Option<usize>,
}

impl BatchRecorder {
	/// Accept `n` batches, then fail every write.
	pub fn failing_after(n: usize) -> Self {
		Self {
			fail_after: Some(n),
			..Self::default()
		}
	}

	pub fn concat(&self) -> Vec<u8> {
		self.batches.concat()
	}
}

#[async_trait]
impl WriteBatch for BatchRecorder {
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		if let Some(n) = self.fail_after {
			if self.batches.len() >= n {
				return Err(io::ErrorKind::BrokenPipe.into());
			}
		}
		self.batches.push(batch.contiguous().into_owned());
		Ok(())
	}

	async fn close(&mut self) -> io::Result<()> {
		self.closed = true;
		Ok(())
	}
}

/// Cloneable view of a [`BatchRecorder`], usable after the writer
/// has been moved into a boxed sink.
#[derive(Clone, Default)]
pub struct SharedRecorder(pub Arc<Mutex<BatchRecorder>>);

impl SharedRecorder {
	pub fn concat(&self) -> Vec<u8> {
		self.0.lock().concat()
	}

	pub fn is_closed(&self) -> bool {
		self.0.lock().closed
	}
}

#[async_trait]
impl WriteBatch for SharedRecorder {
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		let mut inner = self.0.lock();
		if let Some(n) = inner.fail_after {
			if inner.batches.len() >= n {
				return Err(io::ErrorKind::BrokenPipe.into());
			}
		}
		inner.batches.push(batch.contiguous().into_owned());
		Ok(())
	}

	async fn close(&mut self) -> io::Result<()> {
		self.0.lock().closed = true;
		Ok(())
	}
}
