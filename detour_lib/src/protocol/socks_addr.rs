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

use crate::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smol_str::SmolStr;
use std::fmt::{self, Display};

const EMPTY_STRING: &str = "empty string";
const MAX_DOMAIN_LEN: usize = u8::MAX as usize;

// See more at <https://tools.ietf.org/html/rfc1928>
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AddrType {
	Ipv4 = 1_u8,
	Name = 3_u8,
	Ipv6 = 4_u8,
}

impl AddrType {
	#[inline]
	#[must_use]
	pub const fn val(self) -> u8 {
		self as u8
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
	#[error("invalid domain ({0})")]
	InvalidDomain(BoxStdErr),
	#[error("invalid port ({0})")]
	InvalidPort(BoxStdErr),
	#[error("invalid address ({0})")]
	InvalidAddress(BoxStdErr),
}

// -------------------------------------------------------
//                     SocksDestination
// -------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocksDestination {
	Name(DomainName),
	Ip(IpAddr),
}

impl SocksDestination {
	/// Create a new `SocksDestination` from a domain string.
	///
	/// # Errors
	///
	/// Return a [`ReadError`] if `value` is empty or too long.
	#[inline]
	pub fn new_domain(value: impl AsRef<str>) -> Result<Self, ReadError> {
		DomainName::from_str(value.as_ref()).map(SocksDestination::Name)
	}

	#[inline]
	#[must_use]
	pub fn atyp(&self) -> AddrType {
		match self {
			SocksDestination::Name(_) => AddrType::Name,
			SocksDestination::Ip(IpAddr::V4(_)) => AddrType::Ipv4,
			SocksDestination::Ip(IpAddr::V6(_)) => AddrType::Ipv6,
		}
	}

	#[inline]
	#[must_use]
	pub fn to_str(&self) -> Cow<'_, str> {
		match self {
			SocksDestination::Name(name) => Cow::Borrowed(name.as_str()),
			SocksDestination::Ip(ip) => Cow::Owned(ip.to_string()),
		}
	}

	pub fn write_to_no_atyp(&self, buf: &mut impl BufMut) {
		match self {
			SocksDestination::Name(name) => {
				buf.put_u8(name.len());
				buf.put(name.as_bytes());
			}
			SocksDestination::Ip(IpAddr::V4(ipv4)) => buf.put(&ipv4.octets()[..]),
			SocksDestination::Ip(IpAddr::V6(ipv6)) => buf.put(&ipv6.octets()[..]),
		}
	}

	/// Get the minimal length of buffer needed to store the serialized data.
	#[inline]
	#[must_use]
	pub fn serialized_len_atyp(&self) -> usize {
		// ATYP (1 byte) + ADDR
		1 + match self {
			SocksDestination::Ip(IpAddr::V4(_)) => 4,
			SocksDestination::Ip(IpAddr::V6(_)) => 16,
			// N (1 byte) + NAME (N bytes)
			SocksDestination::Name(name) => 1 + name.len() as usize,
		}
	}
}

impl FromStr for SocksDestination {
	type Err = ReadError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Ok(ip) = IpAddr::from_str(s) {
			return Ok(Self::Ip(ip));
		}
		DomainName::from_str(s).map(Self::Name)
	}
}

impl From<DomainName> for SocksDestination {
	#[inline]
	fn from(domain: DomainName) -> Self {
		Self::Name(domain)
	}
}

impl From<Ipv4Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv4Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl From<IpAddr> for SocksDestination {
	#[inline]
	fn from(ip: IpAddr) -> Self {
		Self::Ip(ip)
	}
}

impl Display for SocksDestination {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ip(ip) => ip.fmt(f),
			Self::Name(name) => name.fmt(f),
		}
	}
}

// -------------------------------------------------------
//                       SocksAddr
// -------------------------------------------------------

/// A destination plus a port, displayed as `host:port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocksAddr {
	pub dest: SocksDestination,
	pub port: u16,
}

impl SocksAddr {
	#[inline]
	#[must_use]
	pub fn new(dest: SocksDestination, port: u16) -> Self {
		Self { dest, port }
	}

	/// Return the number of bytes it will take to store the seralized address.
	#[inline]
	#[must_use]
	pub fn serialized_len_atyp(&self) -> usize {
		self.dest.serialized_len_atyp() + 2
	}

	/// Write the address into `buf` in [SOCKS5 address format].
	///
	/// ```not_rust
	/// +------+----------------+----------------+
	/// | ATYP |  Destination   |     Port       |
	/// +------+----------------+----------------+
	/// | u8   | various bytes  |   2 bytes      |
	/// |      |                | big endian u16 |
	/// +------+----------------+----------------+
	/// ```
	///
	/// [SOCKS5 address format]: https://tools.ietf.org/html/rfc1928#section-5
	#[inline]
	pub fn write_to<B: BufMut>(&self, buf: &mut B) {
		buf.put_u8(self.dest.atyp().val());
		self.dest.write_to_no_atyp(buf);
		buf.put_u16(self.port);
	}

	/// Parse `s` as `host:port`. If `default_port` is set, `host` alone
	/// is also accepted.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if the host or the port is invalid,
	/// or if the port is missing and there is no `default_port`.
	pub fn parse_str(s: &str, default_port: Option<u16>) -> Result<Self, ReadError> {
		if let Ok(addr) = s.parse::<SocketAddr>() {
			return Ok(addr.into());
		}
		if s.is_empty() {
			return Err(ReadError::InvalidAddress(EMPTY_STRING.into()));
		}
		let (host, port) = match s.rsplit_once(':') {
			Some((host, port)) => {
				if port.is_empty() {
					return Err(ReadError::InvalidPort(EMPTY_STRING.into()));
				}
				let port = port
					.parse::<u16>()
					.map_err(|err| ReadError::InvalidPort(err.into()))?;
				(host, port)
			}
			None => (
				s,
				default_port.ok_or_else(|| ReadError::InvalidAddress("missing port".into()))?,
			),
		};
		Ok(Self {
			dest: SocksDestination::from_str(host)?,
			port,
		})
	}
}

impl FromStr for SocksAddr {
	type Err = ReadError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse_str(s, None)
	}
}

impl Display for SocksAddr {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.dest {
			SocksDestination::Name(name) => write!(f, "{}:{}", name, self.port),
			SocksDestination::Ip(ip) => SocketAddr::new(*ip, self.port).fmt(f),
		}
	}
}

impl From<SocketAddr> for SocksAddr {
	#[inline]
	fn from(addr: SocketAddr) -> Self {
		Self {
			dest: addr.ip().into(),
			port: addr.port(),
		}
	}
}

#[cfg(feature = "use_serde")]
mod serde_internal {
	use super::{SocksAddr, SocksDestination};
	use serde::{de::Visitor, Deserialize};
	use std::{
		fmt::{self, Formatter},
		str::FromStr,
	};

	impl<'de> Deserialize<'de> for SocksAddr {
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: serde::Deserializer<'de>,
		{
			struct AddressVisitor;

			impl<'de> Visitor<'de> for AddressVisitor {
				type Value = SocksAddr;

				fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
					formatter.write_str("[IP/Domain]:[Port]")
				}

				fn visit_str<E>(self, value: &str) -> Result<SocksAddr, E>
				where
					E: serde::de::Error,
				{
					SocksAddr::from_str(value).map_err(serde::de::Error::custom)
				}
			}

			deserializer.deserialize_str(AddressVisitor)
		}
	}

	impl<'de> Deserialize<'de> for SocksDestination {
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: serde::Deserializer<'de>,
		{
			let s = String::deserialize(deserializer)?;
			SocksDestination::from_str(&s).map_err(serde::de::Error::custom)
		}
	}
}

// -------------------------------------------------------
//                     DomainName
// -------------------------------------------------------

/// A non-empty domain string that's guaranteed to be at most 255 bytes.
///
/// The name is kept exactly as given, since it is used as a cache key
/// and replayed byte for byte in relay requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct DomainName(SmolStr);

impl DomainName {
	#[inline]
	#[must_use]
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	#[allow(clippy::cast_possible_truncation)]
	#[inline]
	#[must_use]
	pub fn len(&self) -> u8 {
		// Length is guaranteed to be u8
		self.0.len() as u8
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl FromStr for DomainName {
	type Err = ReadError;

	fn from_str(v: &str) -> Result<Self, ReadError> {
		if v.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		if v.len() > MAX_DOMAIN_LEN {
			return Err(ReadError::InvalidDomain("too long".into()));
		}
		if v.contains(|c: char| c.is_whitespace() || c.is_control() || c == ':' || c == '/') {
			return Err(ReadError::InvalidDomain(
				format!("'{}' contains invalid characters", v).into(),
			));
		}
		Ok(Self(SmolStr::new(v)))
	}
}

impl std::ops::Deref for DomainName {
	type Target = SmolStr;

	#[inline]
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl AsRef<str> for DomainName {
	#[inline]
	fn as_ref(&self) -> &str {
		self.0.as_ref()
	}
}

impl Display for DomainName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}

// -------------------------------------------------------
//                          Tests
// -------------------------------------------------------
