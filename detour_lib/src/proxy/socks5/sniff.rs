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

use super::{is_domain_atyp, CONNECT_HEAD, GREETING};
use crate::{buf::StreamBatch, prelude::*, protocol::{AddrType, DomainName}};
use std::net::SocketAddrV4;

/// Longest possible `CONNECT` request with a domain address:
/// head (3) + ATYP (1) + N (1) + NAME (255) + PORT (2).
pub const MAX_REQUEST_LEN: usize = CONNECT_HEAD.len() + 1 + 1 + 255 + 2;

const IPV4_REQUEST_LEN: usize = CONNECT_HEAD.len() + 1 + 4 + 2;

/// Longest greeting and request sent together.
const MAX_MESSAGE_LEN: usize = GREETING.len() + MAX_REQUEST_LEN;

/// Target of a recognized `CONNECT` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
	Ipv4(SocketAddrV4),
	Domain(SocksAddr),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
	Complete(Sniffed),
	/// `buf` is a proper prefix of a request that may still match.
	Incomplete,
	NoMatch,
}

/// Try to read a `CONNECT` request at the start of `buf`.
///
/// Only IPv4 and domain targets are recognized. A domain must be
/// non-empty valid UTF-8.
#[must_use]
pub fn parse_connect_head(buf: &[u8]) -> ParseResult {
	if buf.len() < CONNECT_HEAD.len() {
		return if CONNECT_HEAD.starts_with(buf) {
			ParseResult::Incomplete
		} else {
			ParseResult::NoMatch
		};
	}
	if buf[..CONNECT_HEAD.len()] != CONNECT_HEAD {
		return ParseResult::NoMatch;
	}
	let body = &buf[CONNECT_HEAD.len()..];
	let atyp = match body.first() {
		Some(atyp) => *atyp,
		None => return ParseResult::Incomplete,
	};
	if atyp == AddrType::Ipv4.val() {
		if buf.len() < IPV4_REQUEST_LEN {
			return ParseResult::Incomplete;
		}
		let ip = Ipv4Addr::new(body[1], body[2], body[3], body[4]);
		let port = u16::from_be_bytes([body[5], body[6]]);
		return ParseResult::Complete(Sniffed::Ipv4(SocketAddrV4::new(ip, port)));
	}
	if !is_domain_atyp(atyp) {
		return ParseResult::NoMatch;
	}
	let len = match body.get(1) {
		Some(0) => return ParseResult::NoMatch,
		Some(len) => usize::from(*len),
		None => return ParseResult::Incomplete,
	};
	// ATYP + N + NAME + PORT
	let rest = &body[2..];
	if rest.len() < len + 2 {
		return ParseResult::Incomplete;
	}
	let name = match std::str::from_utf8(&rest[..len]) {
		Ok(name) => name,
		Err(_) => return ParseResult::NoMatch,
	};
	let name = match DomainName::from_str(name) {
		Ok(name) => name,
		Err(_) => return ParseResult::NoMatch,
	};
	let port = u16::from_be_bytes([rest[len], rest[len + 1]]);
	ParseResult::Complete(Sniffed::Domain(SocksAddr::new(name.into(), port)))
}

/// Same as [`parse_connect_head`], but also accepts a request that
/// directly follows a greeting in `buf`.
fn parse_message(buf: &[u8]) -> ParseResult {
	match parse_connect_head(buf) {
		ParseResult::NoMatch if buf.starts_with(&GREETING) => {
			parse_connect_head(&buf[GREETING.len()..])
		}
		res => res,
	}
}

/// Looks for a `CONNECT` request, optionally preceded by a greeting,
/// at the start of each batch.
///
/// A request split over several batches is joined back together for
/// inspection. At most a greeting and a request worth of bytes are kept
/// between batches.
#[derive(Default)]
pub struct Sniffer {
	pending: Vec<u8>,
}

impl Sniffer {
	#[inline]
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn inspect(&mut self, batch: &StreamBatch) -> Option<Sniffed> {
		let data = batch.contiguous();
		if !self.pending.is_empty() {
			let mut joined = std::mem::take(&mut self.pending);
			let take = std::cmp::min(data.len(), MAX_MESSAGE_LEN);
			joined.extend_from_slice(&data[..take]);
			match parse_message(&joined) {
				ParseResult::Complete(target) => return Some(target),
				ParseResult::Incomplete => {
					self.pending = joined;
					return None;
				}
				ParseResult::NoMatch => {}
			}
		}
		match parse_message(&data) {
			ParseResult::Complete(target) => Some(target),
			ParseResult::Incomplete => {
				self.pending = data.into_owned();
				None
			}
			ParseResult::NoMatch => None,
		}
	}
}
