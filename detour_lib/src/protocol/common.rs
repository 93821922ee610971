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
use std::fmt;

pub type BoxRead = Box<dyn AsyncRead + Send + Sync + Unpin>;
pub type BoxWrite = Box<dyn AsyncWrite + Send + Sync + Unpin>;

// --------------------------------------------
//                AsyncReadWrite
// --------------------------------------------

pub trait AsyncReadWrite: 'static + AsyncRead + AsyncWrite + Send + Sync + Unpin {
	fn split(self: Box<Self>) -> (BoxRead, BoxWrite);
}

impl AsyncReadWrite for tokio::net::TcpStream {
	fn split(self: Box<Self>) -> (BoxRead, BoxWrite) {
		let (r, w) = self.into_split();
		(Box::new(r), Box::new(w))
	}
}

impl AsyncReadWrite for tokio::io::DuplexStream {
	fn split(self: Box<Self>) -> (BoxRead, BoxWrite) {
		let (r, w) = tokio::io::split(*self);
		(Box::new(r), Box::new(w))
	}
}

// --------------------------------------------
//                   Network
// --------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "use_serde", derive(serde::Deserialize))]
pub enum Network {
	#[cfg_attr(feature = "use_serde", serde(rename = "tcp"))]
	Tcp,
	#[cfg_attr(feature = "use_serde", serde(rename = "udp"))]
	Udp,
}

impl Network {
	#[inline]
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Network::Tcp => "tcp",
			Network::Udp => "udp",
		}
	}
}

impl Default for Network {
	#[inline]
	fn default() -> Self {
		Network::Tcp
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
