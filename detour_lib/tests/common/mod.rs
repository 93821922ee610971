use log::{debug, error};
use parking_lot::Mutex;
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
};

pub const SERVER_INIT_TIME: Duration = Duration::from_millis(200);
pub const IO_TIMEOUT: Duration = Duration::from_secs(3);

pub const GREETING: [u8; 3] = [5, 1, 0];
pub const METHOD_REPLY: [u8; 2] = [5, 0];
pub const CONNECT_REPLY: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

pub fn setup_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// Returns a local address that nothing listens on at the moment.
pub fn free_addr() -> SocketAddr {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	listener.local_addr().unwrap()
}

pub fn connect_request(domain: &str, port: u16) -> Vec<u8> {
	let mut buf = vec![5, 1, 0, 3, domain.len() as u8];
	buf.extend_from_slice(domain.as_bytes());
	buf.extend_from_slice(&port.to_be_bytes());
	buf
}

/// A minimal SOCKS5 server without authentication.
///
/// After the handshake every message is echoed back prefixed by `label`.
/// Raw `CONNECT` requests are kept in `requests`.
pub struct FakeSocks5 {
	pub label: &'static str,
	/// Set to `false` to behave like a blocked site that never answers.
	pub answer_connect: bool,
	pub requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeSocks5 {
	pub fn new(label: &'static str, answer_connect: bool) -> Self {
		Self {
			label,
			answer_connect,
			requests: Arc::default(),
		}
	}

	/// Bind on a random local port and serve in the background.
	pub async fn spawn(&self) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let label = self.label;
		let answer_connect = self.answer_connect;
		let requests = self.requests.clone();
		tokio::spawn(async move {
			loop {
				let (stream, _) = match listener.accept().await {
					Ok(s) => s,
					Err(e) => {
						error!("{} cannot accept ({})", label, e);
						return;
					}
				};
				let requests = requests.clone();
				tokio::spawn(async move {
					if let Err(e) = serve_socks5(stream, label, answer_connect, &requests).await {
						debug!("{} connection ended ({})", label, e);
					}
				});
			}
		});
		addr
	}
}

async fn serve_socks5(
	mut stream: TcpStream,
	label: &str,
	answer_connect: bool,
	requests: &Mutex<Vec<Vec<u8>>>,
) -> io::Result<()> {
	let mut greeting = [0_u8; 3];
	stream.read_exact(&mut greeting).await?;
	if greeting != GREETING {
		return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid greeting"));
	}
	stream.write_all(&METHOD_REPLY).await?;

	let mut head = [0_u8; 5];
	stream.read_exact(&mut head).await?;
	let mut rest = vec![0_u8; usize::from(head[4]) + 2];
	stream.read_exact(&mut rest).await?;
	requests.lock().push([&head[..], &rest].concat());
	if !answer_connect {
		// Hold the connection open without replying.
		let mut buf = [0_u8; 1024];
		while stream.read(&mut buf).await? > 0 {}
		return Ok(());
	}
	stream.write_all(&CONNECT_REPLY).await?;

	let mut buf = vec![0_u8; 4 * 1024];
	loop {
		let n = stream.read(&mut buf).await?;
		if n == 0 {
			return Ok(());
		}
		let mut reply = label.as_bytes().to_vec();
		reply.extend_from_slice(&buf[..n]);
		stream.write_all(&reply).await?;
	}
}

/// Act as a SOCKS5 client of `domain:port` through `stream`,
/// then send `message` and return the reply.
pub async fn request_through(
	stream: &mut TcpStream,
	domain: &str,
	port: u16,
	message: &[u8],
	reply_len: usize,
) -> io::Result<Vec<u8>> {
	stream.write_all(&GREETING).await?;
	let mut method = [0_u8; 2];
	stream.read_exact(&mut method).await?;
	assert_eq!(method, METHOD_REPLY);

	stream.write_all(&connect_request(domain, port)).await?;
	let mut reply = [0_u8; 10];
	stream.read_exact(&mut reply).await?;
	assert_eq!(reply, CONNECT_REPLY);

	stream.write_all(message).await?;
	let mut buf = vec![0_u8; reply_len];
	stream.read_exact(&mut buf).await?;
	Ok(buf)
}
