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
The small subset of SOCKS5 (RFC 1928) this crate speaks.

Only the no-authentication method and the `CONNECT` command are used,
both when recognizing a request inside forwarded traffic and when
replaying a handshake towards a relay.
*/

mod sniff;

pub use sniff::{parse_connect_head, ParseResult, Sniffed, Sniffer, MAX_REQUEST_LEN};

use crate::{prelude::*, protocol::AddrType};
use num_enum::TryFromPrimitive;
use std::fmt::{self, Display};

pub const VER5: u8 = 5;
pub const VAL_NO_AUTH: u8 = 0;
pub const RSV: u8 = 0;

#[derive(Debug, TryFromPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum CommandCode {
	Connect = 1,
	Bind = 2,
	Udp = 3,
}

impl Display for CommandCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CommandCode::Connect => write!(f, "CONNECT"),
			CommandCode::Bind => write!(f, "BIND"),
			CommandCode::Udp => write!(f, "UDP_ASSOCIATE"),
		}?;
		write!(f, "({})", *self as u8)
	}
}

/// Method selection message offering only "no authentication".
pub const GREETING: [u8; 3] = [VER5, 1, VAL_NO_AUTH];

/// The only method selection reply accepted from a relay.
pub const METHOD_REPLY_NO_AUTH: [u8; 2] = [VER5, VAL_NO_AUTH];

/// First three bytes of a `CONNECT` request.
pub const CONNECT_HEAD: [u8; 3] = [VER5, CommandCode::Connect as u8, RSV];

/// Write the method selection message into `buf`.
#[inline]
pub fn write_greeting(buf: &mut impl BufMut) {
	buf.put_slice(&GREETING);
}

/// Write a `CONNECT` request for `addr` into `buf`.
///
/// ```not_rust
/// +-----+-----+-------+------+----------+----------+
/// | VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +-----+-----+-------+------+----------+----------+
/// |  1  |  1  | X'00' |  1   | Variable |    2     |
/// +-----+-----+-------+------+----------+----------+
/// ```
///
/// The port always takes two bytes in network order.
pub fn write_connect_request(buf: &mut impl BufMut, addr: &SocksAddr) {
	buf.put_slice(&CONNECT_HEAD);
	addr.write_to(buf);
}

/// Returns the length of a `CONNECT` request for `addr`.
#[inline]
#[must_use]
pub fn connect_request_len(addr: &SocksAddr) -> usize {
	CONNECT_HEAD.len() + addr.serialized_len_atyp()
}

/// Returns `true` if `atyp` is an address type that carries a domain.
#[inline]
#[must_use]
pub fn is_domain_atyp(atyp: u8) -> bool {
	atyp == AddrType::Name.val()
}
