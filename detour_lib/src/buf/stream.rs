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

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
const MIN_BUFFER_SIZE: usize = 2 * 1024;
/// Largest payload of a UDP datagram.
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Reads a byte stream, at most `buffer_size` bytes per batch.
pub struct StreamReader<R> {
	r: R,
	buf: BytesMut,
	buffer_size: usize,
}

impl<R> StreamReader<R>
where
	R: AsyncRead + Unpin + Send,
{
	#[inline]
	pub fn new(r: R) -> Self {
		Self::with_buffer_size(r, DEFAULT_BUFFER_SIZE)
	}

	#[inline]
	pub fn with_buffer_size(r: R, buffer_size: usize) -> Self {
		Self {
			r,
			buf: BytesMut::new(),
			buffer_size: std::cmp::max(buffer_size, MIN_BUFFER_SIZE),
		}
	}

	#[inline]
	pub fn into_inner(self) -> R {
		self.r
	}
}

#[async_trait]
impl<R> ReadBatch for StreamReader<R>
where
	R: AsyncRead + Unpin + Send,
{
	async fn read_batch(&mut self) -> io::Result<StreamBatch> {
		read_chunk(&mut self.r, &mut self.buf, self.buffer_size).await
	}
}

/// Reads a datagram transport, one datagram per batch.
pub struct PacketReader<R> {
	r: R,
	buf: BytesMut,
}

impl<R> PacketReader<R>
where
	R: AsyncRead + Unpin + Send,
{
	#[inline]
	pub fn new(r: R) -> Self {
		Self {
			r,
			buf: BytesMut::new(),
		}
	}
}

#[async_trait]
impl<R> ReadBatch for PacketReader<R>
where
	R: AsyncRead + Unpin + Send,
{
	async fn read_batch(&mut self) -> io::Result<StreamBatch> {
		read_chunk(&mut self.r, &mut self.buf, MAX_DATAGRAM_SIZE).await
	}
}

async fn read_chunk<R>(r: &mut R, buf: &mut BytesMut, size: usize) -> io::Result<StreamBatch>
where
	R: AsyncRead + Unpin + Send,
{
	buf.reserve(size);
	let n = r.read_buf(buf).await?;
	if n == 0 {
		return Err(end_of_stream());
	}
	Ok(buf.split().freeze().into())
}

/// Writes every chunk into a byte stream and flushes after each batch.
pub struct StreamWriter<W> {
	w: W,
}

impl<W> StreamWriter<W>
where
	W: AsyncWrite + Unpin + Send,
{
	#[inline]
	pub fn new(w: W) -> Self {
		Self { w }
	}

	#[inline]
	pub fn into_inner(self) -> W {
		self.w
	}
}

#[async_trait]
impl<W> WriteBatch for StreamWriter<W>
where
	W: AsyncWrite + Unpin + Send,
{
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		for chunk in batch {
			self.w.write_all(&chunk).await?;
		}
		self.w.flush().await
	}

	async fn close(&mut self) -> io::Result<()> {
		self.w.shutdown().await
	}
}

/// Writes every chunk with exactly one write call, so that each chunk
/// becomes one datagram.
pub struct SequentialWriter<W> {
	w: W,
}

impl<W> SequentialWriter<W>
where
	W: AsyncWrite + Unpin + Send,
{
	#[inline]
	pub fn new(w: W) -> Self {
		Self { w }
	}
}

#[async_trait]
impl<W> WriteBatch for SequentialWriter<W>
where
	W: AsyncWrite + Unpin + Send,
{
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		for chunk in batch {
			let n = self.w.write(&chunk).await?;
			if n != chunk.len() {
				return Err(io::Error::new(
					io::ErrorKind::WriteZero,
					format!("only {} of {} bytes written in datagram", n, chunk.len()),
				));
			}
		}
		Ok(())
	}

	async fn close(&mut self) -> io::Result<()> {
		self.w.shutdown().await
	}
}
