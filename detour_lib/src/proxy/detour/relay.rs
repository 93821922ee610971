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

//! Handshake replayed towards a SOCKS5 relay on behalf of the client.
//!
//! The client has already sent its own greeting and `CONNECT` request to
//! the primary destination, so the relay never sees them. Instead,
//! [`step`] produces an equivalent handshake one step at a time:
//!
//! 1. `SEND_GREETING`: write `05 01 00` to the relay.
//! 2. `AWAIT_METHOD`: read the method selection reply from the relay.
//! 3. `SEND_CONNECT`: write a `CONNECT` request for the target.
//! 4. `STEADY`: plain copy.

use super::session::RelayStep;
use crate::{
	buf::{ReadBatch, StreamBatch, WriteBatch},
	prelude::*,
	proxy::socks5,
	utils::copy::{self, copy, forward, CopyHandler},
};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Mismatch {
	#[error("unexpected method selection reply {0:02x?}")]
	UnexpectedReply(Vec<u8>),
	#[error("no method selection reply ({0})")]
	NoReply(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("relay {0}")]
	Copy(#[from] copy::Error),
	#[error("relay protocol mismatch ({0})")]
	ProtocolMismatch(Mismatch),
}

#[derive(Debug, PartialEq, Eq)]
pub enum StepOutput {
	/// A handshake message has been written.
	Sent,
	/// Raw bytes of the relay's reply.
	Reply(Bytes),
	/// The steady copy reached the end of its source.
	Done,
}

/// Perform exactly one step of the relay handshake.
///
/// `writer` is used by the sending steps, `reader` by `AWAIT_METHOD`,
/// and both by `STEADY`. Advancing the shared step is up to the caller.
///
/// # Errors
///
/// Returns [`Error::Copy`] if writing a handshake message or the steady
/// copy fails, or [`Error::ProtocolMismatch`] if the relay does not reply.
pub async fn step<R, W>(
	step: RelayStep,
	reader: &mut R,
	writer: &mut W,
	target: &SocksAddr,
	handler: &CopyHandler,
) -> Result<StepOutput, Error>
where
	R: ReadBatch + ?Sized,
	W: WriteBatch + ?Sized,
{
	match step {
		RelayStep::SendGreeting => {
			let mut buf = BytesMut::with_capacity(socks5::GREETING.len());
			socks5::write_greeting(&mut buf);
			forward(writer, StreamBatch::from(buf.freeze()), handler).await?;
			Ok(StepOutput::Sent)
		}
		RelayStep::AwaitMethod => loop {
			let batch = reader
				.read_batch()
				.await
				.map_err(|e| Error::ProtocolMismatch(Mismatch::NoReply(e)))?;
			if batch.is_empty() {
				continue;
			}
			handler.observe(&batch);
			return Ok(StepOutput::Reply(Bytes::from(
				batch.contiguous().into_owned(),
			)));
		},
		RelayStep::SendConnect => {
			let mut buf = BytesMut::with_capacity(socks5::connect_request_len(target));
			socks5::write_connect_request(&mut buf, target);
			forward(writer, StreamBatch::from(buf.freeze()), handler).await?;
			Ok(StepOutput::Sent)
		}
		RelayStep::Steady => {
			copy(reader, writer, handler).await?;
			Ok(StepOutput::Done)
		}
	}
}

/// Check that `reply` is exactly `05 00`.
///
/// # Errors
///
/// Returns [`Error::ProtocolMismatch`] for any other reply.
pub fn check_method_reply(reply: &[u8]) -> Result<(), Error> {
	if reply == socks5::METHOD_REPLY_NO_AUTH {
		Ok(())
	} else {
		Err(Error::ProtocolMismatch(Mismatch::UnexpectedReply(
			reply.to_vec(),
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{BatchRecorder, ScriptedReader};

	fn target() -> SocksAddr {
		SocksAddr::from_str("blocked.example:443").unwrap()
	}

	#[test]
	fn test_handshake_bytes() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let mut reader = ScriptedReader::new(vec![Ok(Vec::new()), Ok(vec![5, 0])]);
			let mut writer = BatchRecorder::default();
			let handler = CopyHandler::new();

			let out = step(RelayStep::SendGreeting, &mut reader, &mut writer, &target(), &handler)
				.await
				.unwrap();
			assert_eq!(out, StepOutput::Sent);
			assert_eq!(writer.batches, vec![vec![5, 1, 0]]);

			// Empty batches are skipped while waiting for the reply.
			let out = step(RelayStep::AwaitMethod, &mut reader, &mut writer, &target(), &handler)
				.await
				.unwrap();
			let reply = match out {
				StepOutput::Reply(r) => r,
				other => panic!("unexpected {:?}", other),
			};
			check_method_reply(&reply).unwrap();

			step(RelayStep::SendConnect, &mut reader, &mut writer, &target(), &handler)
				.await
				.unwrap();
			let mut expected = vec![5, 1, 0, 3, 0x0f];
			expected.extend_from_slice(b"blocked.example");
			expected.extend_from_slice(&[0x01, 0xbb]);
			assert_eq!(writer.batches[1], expected);
		});
	}

	#[test]
	fn test_connect_port_encoding() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			for port in [1_u16, 255, 256, 65535] {
				let target = SocksAddr::new(
					SocksDestination::from_str("blocked.example").unwrap(),
					port,
				);
				let mut writer = BatchRecorder::default();
				step(
					RelayStep::SendConnect,
					&mut ScriptedReader::new(Vec::new()),
					&mut writer,
					&target,
					&CopyHandler::new(),
				)
				.await
				.unwrap();
				let sent = writer.concat();
				assert_eq!(sent.len(), 5 + 15 + 2);
				assert_eq!(sent[sent.len() - 2..], port.to_be_bytes());
			}
		});
	}

	#[test]
	fn test_steady_copies() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let mut reader = ScriptedReader::new(vec![Ok(b"GET /".to_vec()), Ok(b" HTTP/1.1".to_vec())]);
			let mut writer = BatchRecorder::default();
			let out = step(
				RelayStep::Steady,
				&mut reader,
				&mut writer,
				&target(),
				&CopyHandler::new(),
			)
			.await
			.unwrap();
			assert_eq!(out, StepOutput::Done);
			assert_eq!(writer.concat(), b"GET / HTTP/1.1");
		});
	}

	#[test]
	fn test_mismatch() {
		assert!(matches!(
			check_method_reply(&[5, 0xff]),
			Err(Error::ProtocolMismatch(Mismatch::UnexpectedReply(_)))
		));
		assert!(check_method_reply(&[5, 0, 0]).is_err());

		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let err = step(
				RelayStep::AwaitMethod,
				&mut ScriptedReader::new(Vec::new()),
				&mut BatchRecorder::default(),
				&target(),
				&CopyHandler::new(),
			)
			.await
			.unwrap_err();
			assert!(matches!(err, Error::ProtocolMismatch(Mismatch::NoReply(_))));

			let err = step(
				RelayStep::SendGreeting,
				&mut ScriptedReader::new(Vec::new()),
				&mut BatchRecorder::failing_after(0),
				&target(),
				&CopyHandler::new(),
			)
			.await
			.unwrap_err();
			assert!(matches!(err, Error::Copy(copy::Error::Write(_))));
		});
	}
}
