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

use super::Error;
use crate::{
	cache::CacheClient,
	prelude::*,
	protocol::{Dispatcher, Network, PolicyProvider, SessionContext},
	proxy::detour::{self, Detour, SessionStats},
	utils::BytesCount,
};
use std::time::Instant;
use tokio::net::TcpListener;

//-----------------------------------
//               Inbound
//-----------------------------------

pub struct Inbound {
	pub tag: Tag,
	pub listen: SocketAddr,
	detour: Detour,
}

impl Inbound {
	#[inline]
	#[must_use]
	pub fn new(tag: Tag, listen: SocketAddr, detour: Detour) -> Self {
		Self {
			tag,
			listen,
			detour,
		}
	}

	#[inline]
	#[must_use]
	pub fn detour(&self) -> &Detour {
		&self.detour
	}

	/// Accept and handle TCP connections forever.
	///
	/// # Errors
	///
	/// Returns an [`Error`] if the listen address cannot be bound or
	/// accepting fails.
	///
	/// Errors occurred in sessions are only logged.
	pub async fn serve(self: &Arc<Self>, dispatcher: Arc<dyn Dispatcher>) -> Result<(), Error> {
		if !self.detour.settings().networks().contains(&Network::Tcp) {
			warn!(
				"Inbound '{}' does not accept TCP, nothing to serve on {}",
				self.tag, self.listen
			);
			return Ok(());
		}
		if self.detour.settings().networks().contains(&Network::Udp) {
			warn!(
				"UDP capture is not available for inbound '{}', only TCP is served",
				self.tag
			);
		}
		let listener = TcpListener::bind(self.listen)
			.await
			.map_err(|err| Error::Bind {
				addr: self.listen,
				err,
			})?;
		warn!("Serving detour inbound '{}' on {}", self.tag, self.listen);
		self.accept_loop(&listener, dispatcher).await
	}

	pub(super) async fn accept_loop(
		self: &Arc<Self>,
		listener: &TcpListener,
		dispatcher: Arc<dyn Dispatcher>,
	) -> Result<(), Error> {
		loop {
			let (stream, from) = listener.accept().await?;
			// randomly generated connection ID
			let conn_id = rand::thread_rng().next_u64();
			let inbound = self.clone();
			let dispatcher = dispatcher.clone();
			tokio::spawn(async move {
				let in_tag = &inbound.tag;
				info!("[{conn_id:x}] accepted connection from '{from}' on '{in_tag}'");
				let ctx = SessionContext {
					source: Some(from),
					..SessionContext::new(conn_id, inbound.tag.clone())
				};
				let stats = SessionStats::default();
				let start_time = Instant::now();
				let res = inbound
					.detour
					.process_counted(&ctx, Box::new(stream), Network::Tcp, dispatcher.as_ref(), &stats)
					.await;

				let sent = BytesCount(stats.uplink.get());
				let recv = BytesCount(stats.downlink.get());
				let lasted_secs = start_time.elapsed().as_secs();
				info!(
					"[{conn_id:x}] session finished with {sent} sent, {recv} received and lasted {lasted_secs} secs"
				);
				match res {
					Ok(()) => {}
					Err(detour::Error::Inactive(secs)) => {
						warn!(
							"[{conn_id:x}] connection closed in '{in_tag}' session due to inactivity for {secs} secs."
						);
					}
					Err(e) => {
						error!("[{conn_id:x}] error occurred in '{in_tag}' session: {e}");
					}
				}
			});
		}
	}
}

//-----------------------------------
//               Builder
//-----------------------------------

#[derive(Debug)]
#[cfg_attr(feature = "use_serde", derive(serde::Deserialize))]
pub struct Builder {
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub tag: Tag,
	pub listen: SocketAddr,
	#[cfg_attr(feature = "use_serde", serde(flatten))]
	pub settings: detour::SettingsBuilder,
}

impl Builder {
	/// Creates an [`Inbound`] sharing `policy` and `cache` with other inbounds.
	///
	/// # Errors
	///
	/// Returns an error if the detour settings are invalid.
	pub fn build(
		self,
		policy: Arc<dyn PolicyProvider>,
		cache: CacheClient,
	) -> Result<Inbound, BoxStdErr> {
		let settings = self.settings.build()?;
		Ok(Inbound::new(
			self.tag,
			self.listen,
			Detour::new(settings, policy, cache),
		))
	}
}
