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
	buf::{pipe, Link, PipeReader, PipeWriter, StreamReader, StreamWriter, WriteBatch},
	prelude::*,
	protocol::{Destination, Dispatcher, Network, SessionContext, SocksDestination},
	utils::copy::{copy, CopyHandler},
};
use std::{io, time::Duration};
use tokio::{
	net::{TcpStream, ToSocketAddrs},
	time::timeout,
};

/// Number of batches each direction of a link can hold while the
/// remote is still being connected.
const PIPE_CAPACITY: usize = 16;

/// Dispatcher that connects directly to the destination over TCP.
///
/// Links are returned before the connection is made. If it cannot be made,
/// the link's source ends and its sink is closed.
pub struct DirectDispatcher {
	dial_timeout: Duration,
}

impl DirectDispatcher {
	#[inline]
	#[must_use]
	pub fn new(dial_timeout: Duration) -> Self {
		Self { dial_timeout }
	}
}

#[async_trait]
impl Dispatcher for DirectDispatcher {
	async fn dispatch(&self, ctx: &SessionContext, dst: &Destination) -> Result<Link, BoxStdErr> {
		if dst.network != Network::Tcp {
			return Err(format!("cannot dispatch {} directly, only TCP is supported", dst).into());
		}
		let (up_r, up_w) = pipe(PIPE_CAPACITY);
		let (down_r, down_w) = pipe(PIPE_CAPACITY);
		let conn_id = ctx.conn_id;
		let addr = dst.addr.clone();
		let dial_timeout = self.dial_timeout;
		tokio::spawn(async move {
			if let Err(e) = pump(&addr, dial_timeout, up_r, down_w).await {
				debug!("[{:x}] direct link to '{}' ended with error ({})", conn_id, addr, e);
			}
		});
		Ok(Link::new(Box::new(down_r), Box::new(up_w)))
	}
}

/// Connect to `addr` and move data between the pipes and the socket.
async fn pump(
	addr: &SocksAddr,
	dial_timeout: Duration,
	mut up: PipeReader,
	mut down: PipeWriter,
) -> io::Result<()> {
	trace!("Dialing TCP connection to '{}'", addr);
	let stream = match &addr.dest {
		SocksDestination::Name(name) => {
			connect_tcp_timeout((name.as_str(), addr.port), dial_timeout).await
		}
		SocksDestination::Ip(ip) => connect_tcp_timeout((*ip, addr.port), dial_timeout).await,
	};
	let stream = match stream {
		Ok(s) => s,
		Err(e) => {
			debug!("Cannot connect to '{}' ({})", addr, e);
			// Ends the link's source.
			down.close().await?;
			return Err(e);
		}
	};
	let (rh, wh) = stream.into_split();
	let mut remote_r = StreamReader::new(rh);
	let mut remote_w = StreamWriter::new(wh);
	let handler = CopyHandler::new();

	let send = async {
		copy(&mut up, &mut remote_w, &handler)
			.await
			.map_err(|e| io::Error::new(e.io().kind(), e.to_string()))?;
		remote_w.close().await
	};
	let recv = async {
		copy(&mut remote_r, &mut down, &handler)
			.await
			.map_err(|e| io::Error::new(e.io().kind(), e.to_string()))?;
		down.close().await
	};
	futures::try_join!(send, recv)?;
	Ok(())
}

async fn connect_tcp_timeout(
	addr: impl ToSocketAddrs,
	timeout_duration: Duration,
) -> io::Result<TcpStream> {
	let stream = match timeout(timeout_duration, TcpStream::connect(addr)).await {
		Ok(res) => res?,
		Err(_) => return Err(io::ErrorKind::TimedOut.into()),
	};
	Ok(stream)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buf::{is_end_of_stream, ReadBatch, StreamBatch};
	use tokio::net::TcpListener;

	#[test]
	fn test_direct_link() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			let addr = listener.local_addr().unwrap();
			let server = tokio::spawn(async move {
				let (mut stream, _) = listener.accept().await.unwrap();
				let mut buf = [0_u8; 5];
				stream.read_exact(&mut buf).await.unwrap();
				assert_eq!(&buf, b"hello");
				stream.write_all(b"world").await.unwrap();
			});

			let dispatcher = DirectDispatcher::new(Duration::from_secs(1));
			let dst = Destination::new(Network::Tcp, SocksAddr::from(addr));
			let mut link = dispatcher
				.dispatch(&SessionContext::default(), &dst)
				.await
				.unwrap();
			link.sink
				.write_batch(StreamBatch::from(&b"hello"[..]))
				.await
				.unwrap();

			let mut received = Vec::new();
			let err = loop {
				match link.source.read_batch().await {
					Ok(b) => received.extend_from_slice(&b.contiguous()),
					Err(e) => break e,
				}
			};
			assert!(is_end_of_stream(&err));
			assert_eq!(received, b"world");
			server.await.unwrap();
		});
	}

	#[test]
	fn test_connection_refused_ends_source() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			// Find a port that nothing listens on.
			let addr = {
				let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
				listener.local_addr().unwrap()
			};
			let dispatcher = DirectDispatcher::new(Duration::from_secs(1));
			let dst = Destination::new(Network::Tcp, SocksAddr::from(addr));
			let mut link = dispatcher
				.dispatch(&SessionContext::default(), &dst)
				.await
				.unwrap();
			let err = link.source.read_batch().await.unwrap_err();
			assert!(is_end_of_stream(&err));
		});
	}

	#[test]
	fn test_udp_not_supported() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let dispatcher = DirectDispatcher::new(Duration::from_secs(1));
			let dst = Destination::new(
				Network::Udp,
				SocksAddr::from_str("127.0.0.1:53").unwrap(),
			);
			assert!(dispatcher
				.dispatch(&SessionContext::default(), &dst)
				.await
				.is_err());
		});
	}
}
