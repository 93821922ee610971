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

use super::{Backend, BlockStatus, DomainRecord, Error};
use crate::{prelude::*, server::BuildError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps records in process memory.
#[derive(Default)]
pub struct MemoryBackend {
	records: RwLock<HashMap<String, BlockStatus>>,
}

impl MemoryBackend {
	#[must_use]
	pub fn with_records(records: impl IntoIterator<Item = DomainRecord>) -> Self {
		Self {
			records: RwLock::new(records.into_iter().map(|r| (r.domain, r.status)).collect()),
		}
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records.read().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.records.read().is_empty()
	}
}

#[async_trait]
impl Backend for MemoryBackend {
	async fn get(&self, domain: &str) -> Result<Option<DomainRecord>, Error> {
		Ok(self.records.read().get(domain).map(|status| DomainRecord {
			domain: domain.to_owned(),
			status: *status,
		}))
	}

	async fn put(&self, record: &DomainRecord) -> Result<(), Error> {
		self.records
			.write()
			.insert(record.domain.clone(), record.status);
		Ok(())
	}
}

#[derive(Debug, Default)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct Builder {
	/// Records loaded at start up.
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub records: Vec<RecordBuilder>,
}

#[derive(Debug)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct RecordBuilder {
	pub domain: String,
	/// Either an integer or flag names separated by `|`.
	pub status: StatusValue,
}

#[derive(Debug)]
#[cfg_attr(feature = "use_serde", derive(serde::Deserialize), serde(untagged))]
pub enum StatusValue {
	Bits(u32),
	Names(String),
}

impl StatusValue {
	fn parse(&self) -> Result<BlockStatus, BuildError> {
		match self {
			StatusValue::Bits(bits) => Ok(BlockStatus::from_bits_retain(*bits)),
			StatusValue::Names(names) => {
				BlockStatus::from_str(names).map_err(|e| BuildError::Cache(e.into()))
			}
		}
	}
}

impl Builder {
	/// Create a [`MemoryBackend`] filled with the configured records.
	///
	/// # Errors
	///
	/// Returns an error if a domain is empty or a status cannot be parsed.
	pub fn build(&self) -> Result<MemoryBackend, BuildError> {
		let mut records = Vec::with_capacity(self.records.len());
		for r in &self.records {
			if r.domain.is_empty() {
				return Err(BuildError::Cache("record domain is empty".into()));
			}
			records.push(DomainRecord {
				domain: r.domain.clone(),
				status: r.status.parse()?,
			});
		}
		Ok(MemoryBackend::with_records(records))
	}
}
