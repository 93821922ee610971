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
Transparent inbound that moves sessions for blocked domains onto a relay.

Every accepted connection is forwarded to a fixed destination (or the one
it was redirected from). While forwarding, the client's traffic is
inspected for a SOCKS5 `CONNECT` request. When the requested domain is
known to be TCP blocked, the rest of the session goes through a SOCKS5
relay instead, with the handshake replayed on the client's behalf.
*/

pub mod relay;
mod session;

pub use session::{RelaySession, RelayState, RelayStep};

use crate::{
	buf::{
		BoxBatchRead, BoxBatchWrite, Link, PacketReader, ReadBatch, SequentialWriter, StreamBatch,
		StreamReader, StreamWriter, WriteBatch,
	},
	cache::CacheClient,
	prelude::*,
	protocol::{
		Destination, Dispatcher, InboundConnection, Network, PolicyProvider, SessionContext,
		SessionPolicy, SystemDialer,
	},
	utils::copy::{
		self, copy, forward, read_next, smart_copy, ActivityTimer, CopyHandler, Counter, Outcome,
		RefCount,
	},
};
use futures::{pin_mut, FutureExt};
use relay::StepOutput;
use std::{io, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("setup error ({0})")]
	Setup(BoxStdErr),
	#[error("unable to get destination")]
	NoDestination,
	#[error("failed to dispatch {dst} ({err})")]
	Dispatch { dst: Destination, err: BoxStdErr },
	#[error("failed to transport request ({0})")]
	Request(relay::Error),
	#[error("failed to transport response ({0})")]
	Response(relay::Error),
	#[error("failed to transport request from redirected connection ({0})")]
	Redirect(copy::Error),
	#[error("failed to close link ({0})")]
	Close(io::Error),
	#[error("inactive for {0} secs")]
	Inactive(u64),
}

#[cfg(feature = "use_serde")]
fn default_networks() -> Vec<Network> {
	vec![Network::Tcp]
}

/// Inbound settings.
#[derive(Debug, Clone)]
pub struct Settings {
	address: Option<SocksDestination>,
	port: u16,
	relay_port: u16,
	networks: Vec<Network>,
	timeout: Duration,
	follow_redirect: bool,
	user_level: u32,
}

impl Settings {
	#[inline]
	#[must_use]
	pub fn networks(&self) -> &[Network] {
		&self.networks
	}

	#[inline]
	#[must_use]
	pub fn user_level(&self) -> u32 {
		self.user_level
	}

	/// Policy for sessions of this inbound.
	///
	/// The idle timeout is replaced by `timeout` if it is set and the user
	/// level is 0.
	#[must_use]
	pub fn policy(&self, provider: &dyn PolicyProvider) -> SessionPolicy {
		let mut policy = provider.for_level(self.user_level);
		if !self.timeout.is_zero() && self.user_level == 0 {
			policy.timeouts.connection_idle = self.timeout;
		}
		policy
	}
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "use_serde", derive(serde::Deserialize))]
pub struct SettingsBuilder {
	/// Address of the primary destination and the relay.
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub address: Option<SocksDestination>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub port: u16,
	pub relay_port: u16,
	#[cfg_attr(feature = "use_serde", serde(default = "default_networks"))]
	pub networks: Vec<Network>,
	/// Idle timeout in seconds for level 0 sessions. 0 means the policy's.
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub timeout: u64,
	/// Use the destination a connection was redirected from, if any.
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub follow_redirect: bool,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub user_level: u32,
}

impl SettingsBuilder {
	#[must_use]
	pub fn new(relay_port: u16) -> Self {
		Self {
			address: None,
			port: 0,
			relay_port,
			networks: vec![Network::Tcp],
			timeout: 0,
			follow_redirect: false,
			user_level: 0,
		}
	}

	/// Creates [`Settings`].
	///
	/// # Errors
	///
	/// Returns [`Error::Setup`] if no network is given or `relay_port` is 0.
	pub fn build(self) -> Result<Settings, Error> {
		if self.networks.is_empty() {
			return Err(Error::Setup("no network specified".into()));
		}
		if self.relay_port == 0 {
			return Err(Error::Setup("relay_port cannot be zero".into()));
		}
		Ok(Settings {
			address: self.address,
			port: self.port,
			relay_port: self.relay_port,
			networks: self.networks,
			timeout: Duration::from_secs(self.timeout),
			follow_redirect: self.follow_redirect,
			user_level: self.user_level,
		})
	}
}

/// Bytes transferred by a session.
#[derive(Clone, Default)]
pub struct SessionStats {
	/// From client to remote.
	pub uplink: Counter,
	/// From remote to client.
	pub downlink: Counter,
}

pub struct Detour {
	settings: Settings,
	policy: Arc<dyn PolicyProvider>,
	cache: CacheClient,
	system_dialer: Option<Arc<dyn SystemDialer>>,
}

impl Detour {
	#[must_use]
	pub fn new(settings: Settings, policy: Arc<dyn PolicyProvider>, cache: CacheClient) -> Self {
		Self {
			settings,
			policy,
			cache,
			system_dialer: None,
		}
	}

	/// Set the dialer used to answer redirected datagrams.
	#[must_use]
	pub fn with_system_dialer(mut self, dialer: Arc<dyn SystemDialer>) -> Self {
		self.system_dialer = Some(dialer);
		self
	}

	#[inline]
	#[must_use]
	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	/// Handle one client connection until it ends.
	///
	/// # Errors
	///
	/// Returns an [`Error`] naming the stage that failed.
	pub async fn process(
		&self,
		ctx: &SessionContext,
		conn: Box<dyn InboundConnection>,
		network: Network,
		dispatcher: &dyn Dispatcher,
	) -> Result<(), Error> {
		self.process_counted(ctx, conn, network, dispatcher, &SessionStats::default())
			.await
	}

	/// Same as [`process`](Self::process), adding transferred bytes into `stats`.
	///
	/// # Errors
	///
	/// Returns an [`Error`] naming the stage that failed.
	pub async fn process_counted(
		&self,
		ctx: &SessionContext,
		conn: Box<dyn InboundConnection>,
		network: Network,
		dispatcher: &dyn Dispatcher,
		stats: &SessionStats,
	) -> Result<(), Error> {
		let conn_id = ctx.conn_id;
		let remote = conn.remote_addr();
		if let Some(remote) = &remote {
			debug!("[{:x}] processing connection from {}", conn_id, remote);
		}
		let (dst, overridden) = self.destination(ctx, conn.as_ref(), network)?;
		let relay_dst = Destination::new(
			network,
			SocksAddr::new(
				self.settings
					.address
					.clone()
					.unwrap_or_else(|| dst.addr.dest.clone()),
				self.settings.relay_port,
			),
		);
		let ctx = SessionContext {
			user_level: self.settings.user_level,
			..ctx.clone()
		};
		let policy = self.settings.policy(self.policy.as_ref());

		let (conn_r, conn_w) = conn.split();
		let mut client_reader: BoxBatchRead = match network {
			Network::Tcp => Box::new(StreamReader::with_buffer_size(
				conn_r,
				policy.buffer.per_connection,
			)),
			Network::Udp => Box::new(PacketReader::new(conn_r)),
		};
		let (mut client_writer, mut redirect_reader): (BoxBatchWrite, Option<BoxBatchRead>) =
			match network {
				Network::Tcp => (Box::new(StreamWriter::new(conn_w)) as BoxBatchWrite, None),
				Network::Udp if !overridden => {
					(Box::new(SequentialWriter::new(conn_w)) as BoxBatchWrite, None)
				}
				Network::Udp => {
					// Responses must come from the original destination.
					let dialer = self.system_dialer.as_ref().ok_or_else(|| {
						Error::Setup("redirected UDP needs a system dialer".into())
					})?;
					let client = remote
						.ok_or_else(|| Error::Setup("client address of UDP session unknown".into()))?;
					let bind = match &dst.addr.dest {
						SocksDestination::Ip(ip) => Some(SocketAddr::new(*ip, dst.addr.port)),
						SocksDestination::Name(_) => None,
					};
					let t_conn = dialer
						.dial_transparent(client, bind)
						.await
						.map_err(|e| Error::Setup(e.into()))?;
					let (t_r, t_w) = t_conn.split();
					(
						Box::new(SequentialWriter::new(t_w)) as BoxBatchWrite,
						Some(Box::new(PacketReader::new(t_r)) as BoxBatchRead),
					)
				}
			};

		let timer = ActivityTimer::new(policy.timeouts.connection_idle);
		let Link {
			source: mut primary_source,
			sink: primary_sink,
		} = dispatch(dispatcher, &ctx, &dst).await?;
		let mut relay_link = match dispatch(dispatcher, &ctx, &relay_dst).await {
			Ok(link) => link,
			Err(e) => {
				primary_source.interrupt();
				return Err(e);
			}
		};
		let mut primary_sink = SharedSink::new(primary_sink);
		info!(
			"[{:x}] forwarding to {}, relay at {}",
			conn_id, dst, relay_dst
		);

		let session = RelaySession::new();
		let request_count = RefCount::new(if redirect_reader.is_some() { 2 } else { 1 });
		let uplink = CopyHandler::new()
			.update_activity(&timer)
			.count_size(&stats.uplink);
		let downlink = CopyHandler::new()
			.update_activity(&timer)
			.count_size(&stats.downlink);
		let request_done = || {
			if request_count.decrease() {
				timer.set_timeout(policy.timeouts.downlink_only);
			}
		};

		let request = {
			let mut primary_sink = primary_sink.clone();
			let relay_sink = &mut relay_link.sink;
			let client_reader = &mut client_reader;
			let session = &session;
			let uplink = &uplink;
			let request_done = &request_done;
			async move {
				let res: Result<(), Error> = async {
					let target = match smart_copy(client_reader, &mut primary_sink, &self.cache, uplink)
						.await
						.map_err(|e| Error::Request(e.into()))?
					{
						Outcome::Finished => {
							session.finish_request();
							primary_sink.close().await.map_err(Error::Close)?;
							return Ok(());
						}
						Outcome::SwitchToRelay(target) => target,
					};
					info!("[{:x}] {} is blocked, switching to relay", conn_id, target);
					session.switch_to_relay(target.clone());
					relay::step(
						RelayStep::SendGreeting,
						client_reader,
						relay_sink,
						&target,
						uplink,
					)
					.await
					.map_err(Error::Request)?;
					session.advance(RelayStep::SendGreeting, RelayStep::AwaitMethod);
					session
						.wait_until(|s| s.step == RelayStep::SendConnect)
						.await;
					relay::step(
						RelayStep::SendConnect,
						client_reader,
						relay_sink,
						&target,
						uplink,
					)
					.await
					.map_err(Error::Request)?;
					session.advance(RelayStep::SendConnect, RelayStep::Steady);
					relay::step(RelayStep::Steady, client_reader, relay_sink, &target, uplink)
						.await
						.map_err(Error::Request)?;
					relay_sink.close().await.map_err(Error::Close)?;
					if let Err(e) = primary_sink.close().await {
						debug!("[{:x}] failed to close abandoned primary link ({})", conn_id, e);
					}
					Ok(())
				}
				.await;
				request_done();
				res
			}
		};

		let response = {
			let primary_source = &mut primary_source;
			let relay_source = &mut relay_link.source;
			let client_writer = &mut client_writer;
			let session = &session;
			let downlink = &downlink;
			let timer = &timer;
			async move {
				let res: Result<(), Error> = async {
					if !forward_until_switch(conn_id, primary_source, client_writer, session, downlink)
						.await
						.map_err(Error::Response)?
					{
						// The client may still ask for a blocked domain.
						trace!("[{:x}] primary source ended before any switch", conn_id);
						if !session.wait_until(RelayState::is_settled).await.use_relay() {
							return Ok(());
						}
					}
					let state = session
						.wait_until(|s| s.step == RelayStep::AwaitMethod)
						.await;
					let target = match state.target {
						Some(target) => target,
						None => return Ok(()),
					};
					let out = relay::step(
						RelayStep::AwaitMethod,
						relay_source,
						client_writer,
						&target,
						downlink,
					)
					.await
					.map_err(Error::Response)?;
					if let StepOutput::Reply(reply) = out {
						relay::check_method_reply(&reply).map_err(Error::Response)?;
					}
					trace!("[{:x}] relay accepted method selection", conn_id);
					session.advance(RelayStep::AwaitMethod, RelayStep::SendConnect);
					session.wait_until(|s| s.step == RelayStep::Steady).await;
					relay::step(
						RelayStep::Steady,
						relay_source,
						client_writer,
						&target,
						downlink,
					)
					.await
					.map_err(Error::Response)?;
					Ok(())
				}
				.await;
				timer.set_timeout(policy.timeouts.uplink_only);
				res
			}
		};

		let redirect = {
			let mut primary_sink = primary_sink.clone();
			let redirect_reader = redirect_reader.as_mut();
			let uplink = &uplink;
			let request_done = &request_done;
			async move {
				let reader = match redirect_reader {
					Some(r) => r,
					None => return Ok(()),
				};
				debug!("[{:x}] forwarding redirected datagrams", conn_id);
				let res = copy(reader, &mut primary_sink, uplink)
					.await
					.map_err(Error::Redirect);
				request_done();
				res
			}
		};

		let result = {
			let tasks = async {
				futures::try_join!(request, response, redirect).map(|_| ())
			}
			.fuse();
			let expired = timer.wait_expired().fuse();
			pin_mut!(tasks, expired);
			#[allow(clippy::mut_mut)]
			{
				futures::select! {
					res = tasks => res,
					_ = expired => Err(Error::Inactive(timer.timeout().as_secs())),
				}
			}
		};

		if result.is_err() {
			client_reader.interrupt();
			client_writer.interrupt();
			primary_source.interrupt();
			primary_sink.interrupt();
			relay_link.interrupt();
			if let Some(r) = &mut redirect_reader {
				r.interrupt();
			}
		}
		result
	}

	/// Returns the destination and whether it was overridden.
	fn destination(
		&self,
		ctx: &SessionContext,
		conn: &dyn InboundConnection,
		network: Network,
	) -> Result<(Destination, bool), Error> {
		let settings = &self.settings;
		if settings.follow_redirect {
			if let Some(dst) = &ctx.original_dst {
				return Ok((Destination::new(network, dst.clone()), true));
			}
			if let Some(addr) = conn.handshake_address() {
				return Ok((
					Destination::new(network, SocksAddr::new(addr, settings.port)),
					true,
				));
			}
		}
		let addr = settings.address.clone().ok_or(Error::NoDestination)?;
		Ok((
			Destination::new(network, SocksAddr::new(addr, settings.port)),
			false,
		))
	}
}

async fn dispatch(
	dispatcher: &dyn Dispatcher,
	ctx: &SessionContext,
	dst: &Destination,
) -> Result<Link, Error> {
	dispatcher
		.dispatch(ctx, dst)
		.await
		.map_err(|err| Error::Dispatch {
			dst: dst.clone(),
			err,
		})
}

/// Copy the primary source into the client until the session switches
/// to the relay.
///
/// Returns `true` if the session switched, or `false` if the primary
/// source ended first.
async fn forward_until_switch(
	conn_id: u64,
	source: &mut BoxBatchRead,
	writer: &mut BoxBatchWrite,
	session: &RelaySession,
	handler: &CopyHandler,
) -> Result<bool, relay::Error> {
	enum Next {
		Read(Result<Option<StreamBatch>, copy::Error>),
		Switched,
	}

	loop {
		let next = {
			let read = read_next(source).fuse();
			let switched = session.wait_until(RelayState::use_relay).fuse();
			pin_mut!(read, switched);
			#[allow(clippy::mut_mut)]
			{
				futures::select! {
					res = read => Next::Read(res),
					_ = switched => Next::Switched,
				}
			}
		};
		match next {
			Next::Switched => return Ok(true),
			Next::Read(Ok(Some(batch))) => {
				if session.use_relay() {
					trace!("[{:x}] dropping primary response after switch", conn_id);
					return Ok(true);
				}
				forward(writer, batch, handler).await?;
			}
			Next::Read(Ok(None)) => return Ok(session.use_relay()),
			Next::Read(Err(e)) => {
				if session.use_relay() {
					debug!("[{:x}] primary link error after switch ({})", conn_id, e);
					return Ok(true);
				}
				return Err(e.into());
			}
		}
	}
}

/// A sink written by more than one task, one batch at a time.
#[derive(Clone)]
struct SharedSink(Arc<AsyncMutex<BoxBatchWrite>>);

impl SharedSink {
	fn new(inner: BoxBatchWrite) -> Self {
		Self(Arc::new(AsyncMutex::new(inner)))
	}
}

#[async_trait]
impl WriteBatch for SharedSink {
	async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
		self.0.lock().await.write_batch(batch).await
	}

	async fn close(&mut self) -> io::Result<()> {
		self.0.lock().await.close().await
	}

	fn interrupt(&mut self) {
		if let Some(mut inner) = self.0.try_lock() {
			inner.interrupt();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		buf::{is_end_of_stream, pipe, PipeReader, PipeWriter},
		cache::{BlockStatus, DomainRecord, MemoryBackend},
		protocol::{HandshakedConnection, StaticPolicy},
		test_utils::init_log,
	};
	use tokio::{io::DuplexStream, sync::mpsc, task::JoinHandle};

	const CONNECT_REPLY: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

	/// Far end of a dispatched link.
	struct Remote {
		dst: Destination,
		received: PipeReader,
		reply: PipeWriter,
	}

	impl Remote {
		/// Receive at least `n` bytes.
		async fn recv(&mut self, n: usize) -> Vec<u8> {
			let mut buf = Vec::new();
			while buf.len() < n {
				let batch = self.received.read_batch().await.unwrap();
				buf.extend_from_slice(&batch.contiguous());
			}
			buf
		}

		async fn recv_to_end(&mut self) -> Vec<u8> {
			let mut buf = Vec::new();
			loop {
				match self.received.read_batch().await {
					Ok(batch) => buf.extend_from_slice(&batch.contiguous()),
					Err(e) => {
						assert!(is_end_of_stream(&e));
						return buf;
					}
				}
			}
		}

		async fn send(&mut self, data: &[u8]) {
			self.reply
				.write_batch(StreamBatch::from(data.to_vec()))
				.await
				.unwrap();
		}
	}

	/// Sink of a link whose far end is already gone when closed.
	struct NotConnectedOnClose(PipeWriter);

	#[async_trait]
	impl WriteBatch for NotConnectedOnClose {
		async fn write_batch(&mut self, batch: StreamBatch) -> io::Result<()> {
			self.0.write_batch(batch).await
		}

		async fn close(&mut self) -> io::Result<()> {
			self.0.close().await?;
			Err(io::ErrorKind::NotConnected.into())
		}

		fn interrupt(&mut self) {
			self.0.interrupt();
		}
	}

	struct PipeDispatcher {
		remotes: mpsc::UnboundedSender<Remote>,
		/// Links to this port fail on close.
		failing_close: Option<u16>,
	}

	#[async_trait]
	impl Dispatcher for PipeDispatcher {
		async fn dispatch(
			&self,
			_ctx: &SessionContext,
			dst: &Destination,
		) -> Result<Link, BoxStdErr> {
			let (received, sink) = pipe(16);
			let (source, reply) = pipe(16);
			self.remotes
				.send(Remote {
					dst: dst.clone(),
					received,
					reply,
				})
				.map_err(|_| "test ended")?;
			let sink: BoxBatchWrite = if self.failing_close == Some(dst.addr.port) {
				Box::new(NotConnectedOnClose(sink))
			} else {
				Box::new(sink)
			};
			Ok(Link::new(Box::new(source), sink))
		}
	}

	struct Harness {
		client: DuplexStream,
		primary: Remote,
		relay: Remote,
		session: JoinHandle<Result<(), Error>>,
	}

	fn settings() -> SettingsBuilder {
		SettingsBuilder {
			address: Some(SocksDestination::from_str("127.0.0.1").unwrap()),
			port: 1080,
			..SettingsBuilder::new(1081)
		}
	}

	fn cache_with(status: BlockStatus) -> CacheClient {
		CacheClient::new(MemoryBackend::with_records(vec![DomainRecord {
			domain: "blocked.example".into(),
			status,
		}]))
	}

	fn connect_request() -> Vec<u8> {
		let mut buf = vec![5, 1, 0, 3, 0x0f];
		buf.extend_from_slice(b"blocked.example");
		buf.extend_from_slice(&[0x01, 0xbb]);
		buf
	}

	async fn start(
		builder: SettingsBuilder,
		cache: CacheClient,
		ctx: SessionContext,
		handshake: Option<SocksDestination>,
	) -> Harness {
		start_with_dispatcher(builder, cache, ctx, handshake, None).await
	}

	async fn start_with_dispatcher(
		builder: SettingsBuilder,
		cache: CacheClient,
		ctx: SessionContext,
		handshake: Option<SocksDestination>,
		failing_close: Option<u16>,
	) -> Harness {
		let detour = Detour::new(
			builder.build().unwrap(),
			Arc::new(StaticPolicy::default()),
			cache,
		);
		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = PipeDispatcher {
			remotes: tx,
			failing_close,
		};
		let (client, server) = tokio::io::duplex(4096);
		let conn: Box<dyn InboundConnection> = match handshake {
			Some(target) => Box::new(HandshakedConnection {
				stream: server,
				remote: None,
				target,
			}),
			None => Box::new(server),
		};
		let session = tokio::spawn(async move {
			detour
				.process(&ctx, conn, Network::Tcp, &dispatcher)
				.await
		});
		let primary = rx.recv().await.unwrap();
		let relay = rx.recv().await.unwrap();
		Harness {
			client,
			primary,
			relay,
			session,
		}
	}

	fn ctx() -> SessionContext {
		SessionContext::new(0x1234, "test".into())
	}

	/// Client greets the primary and sends its `CONNECT` request.
	async fn greet_and_connect(client: &mut DuplexStream, primary: &mut Remote) {
		client.write_all(&[5, 1, 0]).await.unwrap();
		assert_eq!(primary.recv(3).await, [5, 1, 0]);
		primary.send(&[5, 0]).await;
		let mut reply = [0_u8; 2];
		client.read_exact(&mut reply).await.unwrap();
		assert_eq!(reply, [5, 0]);

		let request = connect_request();
		client.write_all(&request).await.unwrap();
		assert_eq!(primary.recv(request.len()).await, request);
	}

	#[test]
	fn test_blocked_domain_moves_to_relay() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let Harness {
				mut client,
				mut primary,
				mut relay,
				session,
			} = start(settings(), cache_with(BlockStatus::TCP_BLOCKED), ctx(), None).await;
			assert_eq!(primary.dst.to_string(), "tcp:127.0.0.1:1080");
			assert_eq!(relay.dst.to_string(), "tcp:127.0.0.1:1081");

			greet_and_connect(&mut client, &mut primary).await;

			// Handshake replayed towards the relay.
			assert_eq!(relay.recv(3).await, [5, 1, 0]);
			relay.send(&[5, 0]).await;
			assert_eq!(relay.recv(22).await, connect_request());
			relay.send(&CONNECT_REPLY).await;
			let mut buf = [0_u8; 10];
			client.read_exact(&mut buf).await.unwrap();
			assert_eq!(buf, CONNECT_REPLY);

			client.write_all(b"hello").await.unwrap();
			assert_eq!(relay.recv(5).await, b"hello");
			relay.send(b"world").await;
			let mut buf = [0_u8; 5];
			client.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"world");

			client.shutdown().await.unwrap();
			assert!(relay.recv_to_end().await.is_empty());
			relay.reply.close().await.unwrap();
			session.await.unwrap().unwrap();
			// Nothing reached the primary after the switch.
			assert!(primary.recv_to_end().await.is_empty());
		});
	}

	/// Relay replies the handshake, then echoes a message.
	async fn finish_on_relay(client: &mut DuplexStream, relay: &mut Remote) {
		assert_eq!(relay.recv(3).await, [5, 1, 0]);
		relay.send(&[5, 0]).await;
		assert_eq!(relay.recv(22).await, connect_request());
		relay.send(&CONNECT_REPLY).await;
		let mut buf = [0_u8; 10];
		client.read_exact(&mut buf).await.unwrap();
		assert_eq!(buf, CONNECT_REPLY);

		client.write_all(b"hello").await.unwrap();
		assert_eq!(relay.recv(5).await, b"hello");
		relay.send(b"world").await;
		let mut buf = [0_u8; 5];
		client.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"world");

		client.shutdown().await.unwrap();
		assert!(relay.recv_to_end().await.is_empty());
		relay.reply.close().await.unwrap();
	}

	#[test]
	fn test_switch_after_primary_ended() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let Harness {
				mut client,
				mut primary,
				mut relay,
				session,
			} = start(settings(), cache_with(BlockStatus::TCP_BLOCKED), ctx(), None).await;

			client.write_all(&[5, 1, 0]).await.unwrap();
			assert_eq!(primary.recv(3).await, [5, 1, 0]);
			primary.send(&[5, 0]).await;
			let mut reply = [0_u8; 2];
			client.read_exact(&mut reply).await.unwrap();
			// Primary goes away before the CONNECT request.
			primary.reply.close().await.unwrap();

			let request = connect_request();
			client.write_all(&request).await.unwrap();
			assert_eq!(primary.recv(request.len()).await, request);

			finish_on_relay(&mut client, &mut relay).await;
			tokio::time::timeout(Duration::from_secs(5), session)
				.await
				.unwrap()
				.unwrap()
				.unwrap();
		});
	}

	#[test]
	fn test_abandoned_primary_close_error_ignored() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let Harness {
				mut client,
				mut primary,
				mut relay,
				session,
			} = start_with_dispatcher(
				settings(),
				cache_with(BlockStatus::TCP_BLOCKED),
				ctx(),
				None,
				Some(1080),
			)
			.await;

			greet_and_connect(&mut client, &mut primary).await;
			finish_on_relay(&mut client, &mut relay).await;
			session.await.unwrap().unwrap();
			assert!(primary.recv_to_end().await.is_empty());
		});
	}

	#[test]
	fn test_primary_close_error_without_switch() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let Harness {
				mut client,
				mut primary,
				relay: _relay,
				session,
			} = start_with_dispatcher(
				settings(),
				cache_with(BlockStatus::GOOD),
				ctx(),
				None,
				Some(1080),
			)
			.await;

			greet_and_connect(&mut client, &mut primary).await;
			client.shutdown().await.unwrap();
			let err = session.await.unwrap().unwrap_err();
			assert!(matches!(err, Error::Close(_)), "unexpected error {}", err);
		});
	}

	#[test]
	fn test_good_domain_stays_on_primary() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let Harness {
				mut client,
				mut primary,
				mut relay,
				session,
			} = start(settings(), cache_with(BlockStatus::GOOD), ctx(), None).await;

			greet_and_connect(&mut client, &mut primary).await;
			primary.send(&CONNECT_REPLY).await;
			let mut buf = [0_u8; 10];
			client.read_exact(&mut buf).await.unwrap();
			assert_eq!(buf, CONNECT_REPLY);

			client.write_all(b"hello").await.unwrap();
			assert_eq!(primary.recv(5).await, b"hello");
			primary.send(b"world").await;
			let mut buf = [0_u8; 5];
			client.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"world");

			client.shutdown().await.unwrap();
			assert!(primary.recv_to_end().await.is_empty());
			primary.reply.close().await.unwrap();
			session.await.unwrap().unwrap();
			assert!(relay.recv_to_end().await.is_empty());
		});
	}

	#[test]
	fn test_relay_method_mismatch() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let Harness {
				mut client,
				mut primary,
				mut relay,
				session,
			} = start(settings(), cache_with(BlockStatus::TCP_BLOCKED), ctx(), None).await;

			greet_and_connect(&mut client, &mut primary).await;
			assert_eq!(relay.recv(3).await, [5, 1, 0]);
			relay.send(&[5, 0xff]).await;
			let err = session.await.unwrap().unwrap_err();
			assert!(
				matches!(
					err,
					Error::Response(relay::Error::ProtocolMismatch(
						relay::Mismatch::UnexpectedReply(_)
					))
				),
				"unexpected error {}",
				err
			);
			// No CONNECT request after a bad reply.
			assert!(relay.recv_to_end().await.is_empty());
		});
	}

	#[test]
	fn test_inactive_session() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let builder = SettingsBuilder {
				timeout: 1,
				..settings()
			};
			// Every end is kept open, but nothing is sent.
			let Harness {
				client: _client,
				primary: _primary,
				relay: _relay,
				session,
			} = start(builder, cache_with(BlockStatus::GOOD), ctx(), None).await;
			let err = tokio::time::timeout(Duration::from_secs(5), session)
				.await
				.unwrap()
				.unwrap()
				.unwrap_err();
			assert!(matches!(err, Error::Inactive(1)), "unexpected error {}", err);
		});
	}

	#[test]
	fn test_follow_redirect() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let builder = SettingsBuilder {
				follow_redirect: true,
				..settings()
			};

			let mut ctx = ctx();
			ctx.original_dst = Some(SocksAddr::from_str("93.184.216.34:443").unwrap());
			let h = start(builder.clone(), cache_with(BlockStatus::GOOD), ctx, None).await;
			assert_eq!(h.primary.dst.to_string(), "tcp:93.184.216.34:443");
			assert_eq!(h.relay.dst.to_string(), "tcp:127.0.0.1:1081");
			h.session.abort();

			// Only the address of a handshake is used.
			let target = SocksDestination::from_str("10.0.0.1").unwrap();
			let h = start(builder, cache_with(BlockStatus::GOOD), self::ctx(), Some(target)).await;
			assert_eq!(h.primary.dst.to_string(), "tcp:10.0.0.1:1080");
			h.session.abort();
		});
	}

	#[test]
	fn test_no_destination() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let detour = Detour::new(
				SettingsBuilder::new(1081).build().unwrap(),
				Arc::new(StaticPolicy::default()),
				cache_with(BlockStatus::GOOD),
			);
			let (tx, _rx) = mpsc::unbounded_channel();
			let (_client, server) = tokio::io::duplex(64);
			let err = detour
				.process(
					&ctx(),
					Box::new(server),
					Network::Tcp,
					&PipeDispatcher {
						remotes: tx,
						failing_close: None,
					},
				)
				.await
				.unwrap_err();
			assert!(matches!(err, Error::NoDestination));
		});
	}

	#[test]
	fn test_settings() {
		let err = SettingsBuilder {
			networks: Vec::new(),
			..settings()
		}
		.build()
		.unwrap_err();
		assert_eq!(err.to_string(), "setup error (no network specified)");
		assert!(SettingsBuilder::new(0).build().is_err());

		let policy = StaticPolicy::default();
		let s = SettingsBuilder {
			timeout: 30,
			..settings()
		}
		.build()
		.unwrap();
		assert_eq!(
			s.policy(&policy).timeouts.connection_idle,
			Duration::from_secs(30)
		);
		let s = SettingsBuilder {
			timeout: 30,
			user_level: 1,
			..settings()
		}
		.build()
		.unwrap();
		assert_eq!(
			s.policy(&policy).timeouts.connection_idle,
			Duration::from_secs(300)
		);
	}
}
