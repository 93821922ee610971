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
Shared block status cache.

Every domain that has been checked is stored as a record holding the
domain and a set of [`BlockStatus`] flags. Records are written by whoever
observes a connection outcome and read by sessions deciding whether to
use a relay.

Lookups never fail: if the backend cannot be reached, the domain is
treated as unknown.
*/

pub mod memory;
pub mod redis;

pub use self::redis::RedisBackend;
pub use memory::MemoryBackend;

use crate::{prelude::*, server::BuildError};
use std::{fmt, io};

bitflags::bitflags! {
	/// Observed failure modes of a domain.
	///
	/// An empty set means the domain is good.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct BlockStatus: u32 {
		const DNS_BLOCKED = 1;
		const TCP_BLOCKED = 1 << 1;
		const TCP_RESET = 1 << 2;
		const WRONG_PAGE = 1 << 3;
		const BLANK_PAGE = 1 << 4;
		// Bits set by newer writers are kept.
		const _ = !0;
	}
}

impl BlockStatus {
	pub const GOOD: Self = Self::empty();

	const KNOWN: Self = Self::DNS_BLOCKED
		.union(Self::TCP_BLOCKED)
		.union(Self::TCP_RESET)
		.union(Self::WRONG_PAGE)
		.union(Self::BLANK_PAGE);

	/// Returns `true` if connections to the domain must go through a relay.
	#[inline]
	#[must_use]
	pub fn needs_relay(self) -> bool {
		self.contains(Self::TCP_BLOCKED)
	}
}

impl fmt::Display for BlockStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_empty() {
			return f.write_str("GOOD");
		}
		let mut first = true;
		for (name, _) in self.iter_names() {
			if !first {
				f.write_str("|")?;
			}
			f.write_str(name)?;
			first = false;
		}
		let unknown = self.bits() & !Self::KNOWN.bits();
		if unknown != 0 {
			if !first {
				f.write_str("|")?;
			}
			write!(f, "{:#x}", unknown)?;
		}
		Ok(())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("invalid block status '{0}'")]
pub struct ParseStatusError(String);

impl FromStr for BlockStatus {
	type Err = ParseStatusError;

	/// Parse either an integer or flag names separated by `|`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if let Ok(bits) = s.parse::<u32>() {
			return Ok(Self::from_bits_retain(bits));
		}
		let mut status = Self::GOOD;
		for name in s.split('|') {
			let name = name.trim().to_ascii_uppercase();
			if name == "GOOD" {
				continue;
			}
			let flag = Self::from_name(&name).ok_or_else(|| ParseStatusError(s.to_owned()))?;
			status |= flag;
		}
		Ok(status)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
	pub domain: String,
	pub status: BlockStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("cache IO error ({0})")]
	Io(#[from] io::Error),
	#[error("cache backend error ({0})")]
	Backend(BoxStdErr),
	#[error("cache server error ({0})")]
	Server(String),
	#[error("invalid record for '{domain}' ({reason})")]
	InvalidRecord {
		domain: String,
		reason: Cow<'static, str>,
	},
	#[error("cache operation timed out")]
	Timeout,
}

/// Storage of domain records.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Returns the record of `domain`, or `None` if there is none.
	async fn get(&self, domain: &str) -> Result<Option<DomainRecord>, Error>;

	/// Insert or replace the record of `record.domain`.
	async fn put(&self, record: &DomainRecord) -> Result<(), Error>;
}

/// Handle to the block status cache, shared by all sessions.
#[derive(Clone)]
pub struct CacheClient {
	backend: Arc<dyn Backend>,
}

impl CacheClient {
	#[inline]
	pub fn new(backend: impl Backend + 'static) -> Self {
		Self {
			backend: Arc::new(backend),
		}
	}

	/// Returns the status of `domain`, or `None` if it is unknown
	/// or the backend cannot be used.
	pub async fn lookup(&self, domain: &str) -> Option<BlockStatus> {
		match self.backend.get(domain).await {
			Ok(record) => record.map(|r| r.status),
			Err(e) => {
				warn!("cannot look up '{}' in block status cache ({})", domain, e);
				None
			}
		}
	}

	/// Same as [`Self::lookup`], but reports backend errors.
	///
	/// # Errors
	///
	/// Returns an error if the backend fails.
	pub async fn try_lookup(&self, domain: &str) -> Result<Option<BlockStatus>, Error> {
		Ok(self.backend.get(domain).await?.map(|r| r.status))
	}

	/// Replace the status of `domain`.
	///
	/// # Errors
	///
	/// Returns an error if the backend fails.
	pub async fn upsert(&self, domain: &str, status: BlockStatus) -> Result<(), Error> {
		debug!("setting block status of '{}' to {}", domain, status);
		self.backend
			.put(&DomainRecord {
				domain: domain.to_owned(),
				status,
			})
			.await
	}

	/// Add `flags` into the status of `domain` and returns the new status.
	///
	/// This is a read followed by a write, concurrent writers may overwrite
	/// each other.
	///
	/// # Errors
	///
	/// Returns an error if the backend fails.
	pub async fn mark(&self, domain: &str, flags: BlockStatus) -> Result<BlockStatus, Error> {
		let status = self.try_lookup(domain).await?.unwrap_or_default() | flags;
		self.upsert(domain, status).await?;
		Ok(status)
	}
}

// -------------------------------------------------------
//                       Builder
// -------------------------------------------------------

#[derive(Debug)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(tag = "kind", rename_all = "lowercase")
)]
pub enum Builder {
	Memory(memory::Builder),
	Redis(self::redis::Builder),
}

impl Builder {
	/// Create a [`CacheClient`]. No connection is made here.
	///
	/// # Errors
	///
	/// Returns an error if the configuration is invalid.
	pub fn build(&self) -> Result<CacheClient, BuildError> {
		Ok(match self {
			Builder::Memory(b) => CacheClient::new(b.build()?),
			Builder::Redis(b) => CacheClient::new(b.build()?),
		})
	}
}

impl Default for Builder {
	fn default() -> Self {
		Builder::Redis(self::redis::Builder::default())
	}
}
