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

use super::{global, inbound, BuildError, Server};
use crate::{cache, prelude::*, protocol::policy};

#[derive(Debug, Default)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(deny_unknown_fields)
)]
pub struct Builder {
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub global: global::Builder,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub policy: policy::Builder,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub cache: cache::Builder,
	pub inbounds: Vec<inbound::Builder>,
}

impl Builder {
	/// Creates a [`Server`].
	///
	/// # Errors
	///
	/// Returns an error if any of the inbounds, the policy or the cache
	/// failed to build, or if inbound tags are duplicated.
	pub fn build(self) -> Result<Server, BuildError> {
		let global = self.global.build()?;
		let policy: Arc<dyn crate::protocol::PolicyProvider> = Arc::new(self.policy.build()?);
		let cache = self.cache.build()?;

		let mut inbounds = Vec::with_capacity(self.inbounds.len());
		for (ind, builder) in self.inbounds.into_iter().enumerate() {
			inbounds.push(
				builder
					.build(policy.clone(), cache.clone())
					.map_err(|err| BuildError::Inbound { ind, err })?,
			);
		}

		Server::new(inbounds, global, cache)
	}
}
