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

mod builder;
mod dispatcher;
mod error;
pub mod global;
pub mod inbound;

pub use builder::Builder;
pub use dispatcher::DirectDispatcher;
pub use error::{BuildError, Error};
pub use global::Global;
pub use inbound::Inbound;

use crate::{cache::CacheClient, prelude::*, protocol::Dispatcher};
use futures::TryFutureExt;
use std::collections::HashMap;

pub struct Server {
	pub inbounds: Vec<Arc<Inbound>>,
	pub global: Global,
	cache: CacheClient,
	dispatcher: Arc<dyn Dispatcher>,
	inbound_tags: HashMap<Tag, usize>,
}

impl Server {
	/// Creates a new server that connects to destinations directly.
	///
	/// # Errors
	///
	/// Returns [`BuildError::InboundTagAlreadyExists`] if there are any
	/// duplicate tags in `inbounds`.
	pub fn new(
		inbounds: Vec<Inbound>,
		global: Global,
		cache: CacheClient,
	) -> Result<Self, BuildError> {
		let mut inbound_tags = HashMap::new();
		for (ind, inbound) in inbounds.iter().enumerate() {
			if inbound.tag.is_empty() {
				continue;
			}
			if inbound_tags.insert(inbound.tag.clone(), ind).is_some() {
				return Err(BuildError::InboundTagAlreadyExists {
					ind,
					tag: inbound.tag.clone(),
				});
			}
		}
		Ok(Self {
			dispatcher: Arc::new(DirectDispatcher::new(global.dial_tcp_timeout)),
			inbounds: inbounds.into_iter().map(Arc::new).collect(),
			global,
			cache,
			inbound_tags,
		})
	}

	/// Replace the dispatcher used to reach destinations and relays.
	#[must_use]
	pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
		self.dispatcher = dispatcher;
		self
	}

	/// Start running the server.
	///
	/// # Errors
	///
	/// Returns an error if any inbound fails to bind or accept.
	///
	/// After initializing all inbounds, all session errors will only be logged.
	pub async fn serve(self: Arc<Self>) -> Result<(), BoxStdErr> {
		let tasks = self.inbounds.iter().map(|inbound| {
			let inbound = inbound.clone();
			let dispatcher = self.dispatcher.clone();
			async move { inbound.serve(dispatcher).await }
				.map_err(|e| Box::new(e) as BoxStdErr)
		});
		futures::future::try_join_all(tasks).await?;
		Ok(())
	}

	/// Handle to the block status cache shared by all inbounds.
	#[inline]
	#[must_use]
	pub fn cache(&self) -> &CacheClient {
		&self.cache
	}

	#[must_use]
	pub fn get_inbound(&self, tag: &str) -> Option<&Inbound> {
		self.inbound_tags
			.get(tag)
			.map(|ind| self.inbounds[*ind].as_ref())
	}
}
