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

//! Chunked byte streams.
//!
//! Everything that moves bytes in this crate does so in [`StreamBatch`]es:
//! one read produces one batch, and a batch is either written as a whole
//! or not at all.

mod pipe;
mod stream;

pub use pipe::{pipe, PipeReader, PipeWriter};
pub use stream::{PacketReader, SequentialWriter, StreamReader, StreamWriter};

use crate::prelude::*;
use std::io;

/// Ordered chunks returned by a single read.
///
/// Concatenating all chunks yields a contiguous range of the stream.
/// Empty chunks are never stored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamBatch(Vec<Bytes>);

impl StreamBatch {
	#[inline]
	#[must_use]
	pub fn new() -> Self {
		Self(Vec::new())
	}

	/// Append `chunk` at the end of the batch.
	#[inline]
	pub fn push(&mut self, chunk: Bytes) {
		if !chunk.is_empty() {
			self.0.push(chunk);
		}
	}

	/// Move all chunks of `other` to the end of this batch.
	#[inline]
	pub fn append(&mut self, other: StreamBatch) {
		self.0.extend(other.0);
	}

	/// Total number of bytes in all chunks.
	#[inline]
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.iter().map(Bytes::len).sum()
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[inline]
	#[must_use]
	pub fn chunks(&self) -> &[Bytes] {
		&self.0
	}

	/// Returns all bytes as one slice.
	///
	/// Only allocates if there is more than one chunk.
	#[must_use]
	pub fn contiguous(&self) -> Cow<'_, [u8]> {
		match self.0.as_slice() {
			[] => Cow::Borrowed(&[]),
			[single] => Cow::Borrowed(single.as_ref()),
			chunks => {
				let mut buf = Vec::with_capacity(self.len());
				for c in chunks {
					buf.extend_from_slice(c);
				}
				Cow::Owned(buf)
			}
		}
	}
}

impl From<Bytes> for StreamBatch {
	#[inline]
	fn from(chunk: Bytes) -> Self {
		let mut res = Self::new();
		res.push(chunk);
		res
	}
}

impl From<Vec<u8>> for StreamBatch {
	#[inline]
	fn from(buf: Vec<u8>) -> Self {
		Bytes::from(buf).into()
	}
}

impl From<&'static [u8]> for StreamBatch {
	#[inline]
	fn from(buf: &'static [u8]) -> Self {
		Bytes::from_static(buf).into()
	}
}

impl IntoIterator for StreamBatch {
	type Item = Bytes;
	type IntoIter = std::vec::IntoIter<Bytes>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

/// Source half of a transport endpoint.
#[async_trait]
pub trait ReadBatch: Send {
	/// Read the next batch.
	///
	/// An `Ok` with an empty batch means nothing has been read yet.
	///
	/// # Errors
	///
	/// Returns an error when the stream terminates. A clean termination
	/// is reported with an error that satisfies [`is_end_of_stream`].
	async fn read_batch(&mut self) -> io::Result<StreamBatch>;

	/// Unblock and stop the reader. Reads afterwards fail or return end of stream.
	fn interrupt(&mut self) {}
}

/// Sink half of a transport endpoint.
#[async_trait]
pub trait WriteBatch: Send {
	/// Write all chunks of `batch`.
	///
	/// # Errors
	///
	/// Returns an error if any chunk cannot be written. The state of the
	/// sink for this batch is then undefined.
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()>;

	/// Signal that no more data will be written.
	///
	/// # Errors
	///
	/// Returns an error if the underlying transport fails to shut down.
	async fn close(&mut self) -> io::Result<()>;

	/// Unblock and stop the writer.
	fn interrupt(&mut self) {}
}

pub type BoxBatchRead = Box<dyn ReadBatch>;
pub type BoxBatchWrite = Box<dyn WriteBatch>;

#[async_trait]
impl<T: ReadBatch + ?Sized> ReadBatch for Box<T> {
	#[inline]
	async fn read_batch(&mut self) -> io::Result<StreamBatch> {
		(**self).read_batch().await
	}

	#[inline]
	fn interrupt(&mut self) {
		(**self).interrupt();
	}
}

#[async_trait]
impl<T: WriteBatch + ?Sized> WriteBatch for Box<T> {
	#[inline]
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		(**self).write_batch(batch).await
	}

	#[inline]
	async fn close(&mut self) -> io::Result<()> {
		(**self).close().await
	}

	#[inline]
	fn interrupt(&mut self) {
		(**self).interrupt();
	}
}

/// A pair of endpoints returned by a dispatcher.
///
/// `source` yields what the remote sends back, `sink` carries what
/// is sent to the remote.
pub struct Link {
	pub source: BoxBatchRead,
	pub sink: BoxBatchWrite,
}

impl Link {
	#[inline]
	#[must_use]
	pub fn new(source: BoxBatchRead, sink: BoxBatchWrite) -> Self {
		Self { source, sink }
	}

	/// Create a link over a byte stream, reading at most `buffer_size`
	/// bytes at a time.
	#[must_use]
	pub fn from_stream<R, W>(r: R, w: W, buffer_size: usize) -> Self
	where
		R: 'static + AsyncRead + Unpin + Send,
		W: 'static + AsyncWrite + Unpin + Send,
	{
		Self {
			source: Box::new(StreamReader::with_buffer_size(r, buffer_size)),
			sink: Box::new(StreamWriter::new(w)),
		}
	}

	#[inline]
	pub fn interrupt(&mut self) {
		self.source.interrupt();
		self.sink.interrupt();
	}
}

/// Error used to signal a clean end of stream.
#[inline]
#[must_use]
pub fn end_of_stream() -> io::Error {
	io::ErrorKind::UnexpectedEof.into()
}

/// Returns `true` if `err` means the stream ended normally.
#[inline]
#[must_use]
pub fn is_end_of_stream(err: &io::Error) -> bool {
	err.kind() == io::ErrorKind::UnexpectedEof
}
