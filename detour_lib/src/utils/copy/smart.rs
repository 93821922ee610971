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

use super::{forward, read_next, CopyHandler, Error};
use crate::{
	buf::{ReadBatch, WriteBatch},
	cache::CacheClient,
	prelude::*,
	proxy::socks5::{Sniffed, Sniffer},
};

/// How a [`smart_copy`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// Source reached the end of stream.
	Finished,
	/// A request for a blocked domain was forwarded. Further data should
	/// go to a relay asking for this target.
	SwitchToRelay(SocksAddr),
}

/// Same as [`copy`](super::copy), but stops after forwarding the batch that
/// completes a SOCKS5 `CONNECT` request for a domain marked as
/// TCP blocked in `cache`.
///
/// Every batch is forwarded as is, whether it has been recognized or not.
/// IP targets are never looked up.
///
/// # Errors
///
/// Same as [`copy`](super::copy).
pub async fn smart_copy<R, W>(
	reader: &mut R,
	writer: &mut W,
	cache: &CacheClient,
	handler: &CopyHandler,
) -> Result<Outcome, Error>
where
	R: ReadBatch + ?Sized,
	W: WriteBatch + ?Sized,
{
	let mut sniffer = Sniffer::new();
	loop {
		let batch = match read_next(reader).await? {
			Some(b) => b,
			None => return Ok(Outcome::Finished),
		};
		if batch.is_empty() {
			continue;
		}
		let target = match sniffer.inspect(&batch) {
			Some(Sniffed::Domain(addr)) => Some(addr),
			Some(Sniffed::Ipv4(addr)) => {
				debug!("CONNECT request to IPv4 address {} found", addr);
				None
			}
			None => None,
		};
		let switch = match target {
			Some(addr) => {
				let domain = addr.dest.to_str();
				match cache.lookup(&domain).await {
					Some(status) if status.needs_relay() => {
						debug!("'{}' is blocked ({}), switching to relay", domain, status);
						true
					}
					Some(status) => {
						trace!("'{}' has status {}", domain, status);
						false
					}
					None => {
						trace!("'{}' not found in block status cache", domain);
						false
					}
				}
				.then(|| addr)
			}
			None => None,
		};
		forward(writer, batch, handler).await?;
		if let Some(addr) = switch {
			return Ok(Outcome::SwitchToRelay(addr));
		}
	}
}
