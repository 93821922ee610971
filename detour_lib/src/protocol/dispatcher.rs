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

use super::{AsyncReadWrite, Network, SocksAddr};
use crate::{buf::Link, prelude::*};
use std::{fmt, io};

/// Where a link should lead to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
	pub network: Network,
	pub addr: SocksAddr,
}

impl Destination {
	#[inline]
	#[must_use]
	pub fn new(network: Network, addr: SocksAddr) -> Self {
		Self { network, addr }
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.network, self.addr)
	}
}

/// Information about the session a link is requested for.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
	pub conn_id: u64,
	pub inbound_tag: Tag,
	/// Address of the client.
	pub source: Option<SocketAddr>,
	/// Destination the client originally connected to, if the connection
	/// was redirected to this inbound by the platform.
	pub original_dst: Option<SocksAddr>,
	pub user_level: u32,
}

impl SessionContext {
	#[inline]
	#[must_use]
	pub fn new(conn_id: u64, inbound_tag: Tag) -> Self {
		Self {
			conn_id,
			inbound_tag,
			..Self::default()
		}
	}
}

/// Opens links to destinations.
#[async_trait]
pub trait Dispatcher: Send + Sync {
	/// Returns a link to `dst`.
	///
	/// The returned link may be lazy: the remote end does not need to be
	/// connected yet.
	///
	/// # Errors
	///
	/// Returns an error if no link can be created for `dst`.
	async fn dispatch(&self, ctx: &SessionContext, dst: &Destination) -> Result<Link, BoxStdErr>;
}

/// Opens sockets bound to a foreign address, used to answer redirected
/// datagrams on behalf of their original destination.
#[async_trait]
pub trait SystemDialer: Send + Sync {
	/// Connect to `dst`, with the local end bound to `bind` if set.
	///
	/// # Errors
	///
	/// Returns an error if the socket cannot be created, bound or connected.
	async fn dial_transparent(
		&self,
		dst: SocketAddr,
		bind: Option<SocketAddr>,
	) -> io::Result<Box<dyn AsyncReadWrite>>;
}
