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

use crate::{
	prelude::{BoxStdErr, Tag},
	proxy::detour,
};
use std::{borrow::Cow, io, net::SocketAddr};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
	#[error("cannot listen on {addr} ({err})")]
	Bind { addr: SocketAddr, err: io::Error },
	#[error("proxy IO error ({0})")]
	Io(#[from] io::Error),
	#[error("session error ({0})")]
	Session(#[from] detour::Error),
}

#[derive(Debug, ThisError)]
pub enum BuildError {
	#[error("tag '{tag}' on inbound '{ind}' already exists")]
	InboundTagAlreadyExists { ind: usize, tag: Tag },
	#[error("error on inbound '{ind}' ({err})")]
	Inbound { ind: usize, err: BoxStdErr },
	#[error("value of '{0}' cannot be zero")]
	ValueIsZero(Cow<'static, str>),
	#[error("policy error ({0})")]
	Policy(BoxStdErr),
	#[error("cache error ({0})")]
	Cache(BoxStdErr),
}
