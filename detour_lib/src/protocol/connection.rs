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

use super::{AsyncReadWrite, SocksDestination};
use crate::prelude::*;

/// An accepted client connection.
pub trait InboundConnection: AsyncReadWrite {
	/// Address of the peer, if known.
	fn remote_addr(&self) -> Option<SocketAddr>;

	/// Target address announced by a handshake done before the session
	/// started. Only the address is given, the port is up to the inbound.
	///
	/// Plain connections have none.
	fn handshake_address(&self) -> Option<SocksDestination> {
		None
	}
}

impl InboundConnection for tokio::net::TcpStream {
	#[inline]
	fn remote_addr(&self) -> Option<SocketAddr> {
		self.peer_addr().ok()
	}
}

/// A byte stream with a target attached, for connections accepted by
/// another inbound that already decoded where the client wants to go.
pub struct HandshakedConnection<S> {
	pub stream: S,
	pub remote: Option<SocketAddr>,
	pub target: SocksDestination,
}

impl<S> AsyncRead for HandshakedConnection<S>
where
	S: AsyncRead + Unpin,
{
	#[inline]
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &mut tokio::io::ReadBuf<'_>,
	) -> std::task::Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
	}
}

impl<S> AsyncWrite for HandshakedConnection<S>
where
	S: AsyncWrite + Unpin,
{
	#[inline]
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &[u8],
	) -> std::task::Poll<std::io::Result<usize>> {
		Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
	}

	#[inline]
	fn poll_flush(
		self: Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().stream).poll_flush(cx)
	}

	#[inline]
	fn poll_shutdown(
		self: Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
	}
}

impl<S> AsyncReadWrite for HandshakedConnection<S>
where
	S: 'static + AsyncRead + AsyncWrite + Send + Sync + Unpin,
{
	fn split(self: Box<Self>) -> (super::BoxRead, super::BoxWrite) {
		let (r, w) = tokio::io::split(self.stream);
		(Box::new(r), Box::new(w))
	}
}

impl<S> InboundConnection for HandshakedConnection<S>
where
	S: 'static + AsyncRead + AsyncWrite + Send + Sync + Unpin,
{
	#[inline]
	fn remote_addr(&self) -> Option<SocketAddr> {
		self.remote
	}

	#[inline]
	fn handshake_address(&self) -> Option<SocksDestination> {
		Some(self.target.clone())
	}
}

impl InboundConnection for tokio::io::DuplexStream {
	#[inline]
	fn remote_addr(&self) -> Option<SocketAddr> {
		None
	}
}
