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
//! Backend speaking the Redis protocol.
//!
//! A record is a hash stored at key `<domain>`:
//!
//! | field    | value                    |
//! |----------|--------------------------|
//! | `URL`    | the domain               |
//! | `Status` | [`BlockStatus`] bits     |

use super::{Backend, BlockStatus, DomainRecord, Error};
use crate::{prelude::*, server::BuildError};
use bb8_redis::{
	bb8::{Pool, RunError},
	RedisConnectionManager,
};
use redis::{ConnectionInfo, IntoConnectionInfo, RedisError};
use std::{collections::HashMap, time::Duration};
use tokio::{sync::OnceCell, time::timeout};

const FIELD_URL: &str = "URL";
const FIELD_STATUS: &str = "Status";

fn default_addr() -> String {
	"127.0.0.1:6379".to_owned()
}

const fn default_max_idle() -> usize {
	10
}

const fn default_idle_timeout_secs() -> u64 {
	240
}

const fn default_dial_timeout_ms() -> u64 {
	2_000
}

const fn default_io_timeout_ms() -> u64 {
	2_000
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
	/// Server address as `host:port` or a `redis://` URL.
	pub addr: String,
	/// Maximum number of connections kept by the pool.
	pub max_idle: usize,
	/// Idle connections older than this are closed instead of reused.
	pub idle_timeout: Duration,
	/// Limit for getting a usable connection out of the pool.
	pub dial_timeout: Duration,
	/// Limit for a whole request and reply exchange.
	pub io_timeout: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			addr: default_addr(),
			max_idle: default_max_idle(),
			idle_timeout: Duration::from_secs(default_idle_timeout_secs()),
			dial_timeout: Duration::from_millis(default_dial_timeout_ms()),
			io_timeout: Duration::from_millis(default_io_timeout_ms()),
		}
	}
}

fn connection_info(addr: &str) -> Result<ConnectionInfo, RedisError> {
	if addr.contains("://") {
		addr.into_connection_info()
	} else {
		format!("redis://{}", addr).into_connection_info()
	}
}

/// Pooled Redis client.
///
/// The pool is created on first use, so a backend can be built outside of
/// a runtime. Connections are dialed on demand with a single attempt.
pub struct RedisBackend {
	config: PoolConfig,
	info: ConnectionInfo,
	pool: OnceCell<Pool<RedisConnectionManager>>,
}

impl RedisBackend {
	/// # Errors
	///
	/// Returns [`Error::Backend`] if `config.addr` is not a valid address.
	pub fn new(config: PoolConfig) -> Result<Self, Error> {
		let info = connection_info(&config.addr).map_err(|e| Error::Backend(Box::new(e)))?;
		Ok(Self {
			config,
			info,
			pool: OnceCell::new(),
		})
	}

	/// Number of idle connections in the pool.
	#[must_use]
	pub fn idle_count(&self) -> usize {
		self.pool
			.get()
			.map_or(0, |pool| pool.state().idle_connections as usize)
	}

	async fn pool(&self) -> Result<&Pool<RedisConnectionManager>, Error> {
		self.pool
			.get_or_try_init(|| async {
				trace!("creating block status cache pool for {}", self.config.addr);
				let manager = RedisConnectionManager::new(self.info.clone())?;
				let size = u32::try_from(self.config.max_idle).unwrap_or(u32::MAX).max(1);
				let pool = Pool::builder()
					.max_size(size)
					.idle_timeout(Some(self.config.idle_timeout))
					.connection_timeout(self.config.dial_timeout)
					.retry_connection(false)
					.build_unchecked(manager);
				Ok::<_, Error>(pool)
			})
			.await
	}

	async fn query<T>(&self, cmd: &redis::Cmd) -> Result<T, Error>
	where
		T: redis::FromRedisValue,
	{
		let pool = self.pool().await?;
		let mut conn = pool.get().await.map_err(|e| match e {
			RunError::User(e) => Error::from(e),
			RunError::TimedOut => Error::Timeout,
		})?;
		timeout(self.config.io_timeout, cmd.query_async(&mut *conn))
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(Error::from)
	}
}

impl From<RedisError> for Error {
	fn from(e: RedisError) -> Self {
		if e.kind() == redis::ErrorKind::ResponseError {
			Error::Server(e.to_string())
		} else {
			Error::Backend(Box::new(e))
		}
	}
}

#[async_trait]
impl Backend for RedisBackend {
	async fn get(&self, domain: &str) -> Result<Option<DomainRecord>, Error> {
		let fields: HashMap<String, String> =
			self.query(redis::cmd("HGETALL").arg(domain)).await?;
		if fields.is_empty() {
			return Ok(None);
		}
		parse_record(domain, fields).map(Some)
	}

	async fn put(&self, record: &DomainRecord) -> Result<(), Error> {
		self.query(
			redis::cmd("HSET")
				.arg(&record.domain)
				.arg(FIELD_URL)
				.arg(&record.domain)
				.arg(FIELD_STATUS)
				.arg(record.status.bits()),
		)
		.await
	}
}

fn parse_record(domain: &str, mut fields: HashMap<String, String>) -> Result<DomainRecord, Error> {
	let invalid = |reason: Cow<'static, str>| Error::InvalidRecord {
		domain: domain.to_owned(),
		reason,
	};
	let status = fields
		.get(FIELD_STATUS)
		.ok_or_else(|| invalid("missing Status".into()))?;
	let bits = status
		.trim()
		.parse::<u32>()
		.map_err(|_| invalid(format!("invalid status '{}'", status).into()))?;
	Ok(DomainRecord {
		domain: fields
			.remove(FIELD_URL)
			.unwrap_or_else(|| domain.to_owned()),
		status: BlockStatus::from_bits_retain(bits),
	})
}

// -------------------------------------------------------
//                       Builder
// -------------------------------------------------------

#[derive(Debug)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct Builder {
	/// Default: "127.0.0.1:6379"
	#[cfg_attr(feature = "use_serde", serde(default = "default_addr"))]
	pub addr: String,
	/// Default: 10
	#[cfg_attr(feature = "use_serde", serde(default = "default_max_idle"))]
	pub max_idle: usize,
	/// Default: 240
	#[cfg_attr(feature = "use_serde", serde(default = "default_idle_timeout_secs"))]
	pub idle_timeout_secs: u64,
	/// Default: 2000
	#[cfg_attr(feature = "use_serde", serde(default = "default_dial_timeout_ms"))]
	pub dial_timeout_ms: u64,
	/// Default: 2000
	#[cfg_attr(feature = "use_serde", serde(default = "default_io_timeout_ms"))]
	pub io_timeout_ms: u64,
}

impl Builder {
	/// Create a [`RedisBackend`].
	///
	/// # Errors
	///
	/// Returns an error if the address is invalid or a limit is zero.
	pub fn build(&self) -> Result<RedisBackend, BuildError> {
		if self.addr.is_empty() {
			return Err(BuildError::Cache("empty cache server address".into()));
		}
		if self.max_idle == 0 {
			return Err(BuildError::ValueIsZero(Cow::Borrowed("max_idle")));
		}
		if self.idle_timeout_secs == 0 {
			return Err(BuildError::ValueIsZero(Cow::Borrowed("idle_timeout_secs")));
		}
		if self.dial_timeout_ms == 0 {
			return Err(BuildError::ValueIsZero(Cow::Borrowed("dial_timeout_ms")));
		}
		if self.io_timeout_ms == 0 {
			return Err(BuildError::ValueIsZero(Cow::Borrowed("io_timeout_ms")));
		}
		RedisBackend::new(PoolConfig {
			addr: self.addr.clone(),
			max_idle: self.max_idle,
			idle_timeout: Duration::from_secs(self.idle_timeout_secs),
			dial_timeout: Duration::from_millis(self.dial_timeout_ms),
			io_timeout: Duration::from_millis(self.io_timeout_ms),
		})
		.map_err(|e| BuildError::Cache(e.into()))
	}
}

impl Default for Builder {
	fn default() -> Self {
		Self {
			addr: default_addr(),
			max_idle: default_max_idle(),
			idle_timeout_secs: default_idle_timeout_secs(),
			dial_timeout_ms: default_dial_timeout_ms(),
			io_timeout_ms: default_io_timeout_ms(),
		}
	}
}
