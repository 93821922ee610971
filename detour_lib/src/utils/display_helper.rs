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

use std::fmt;

/// Byte count shown with a binary unit, like `1.50KiB`.
///
/// Used for per session traffic in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BytesCount(pub u64);

impl fmt::Display for BytesCount {
	#[allow(clippy::cast_precision_loss)]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		const BASE: u64 = 1024;
		const UNITS: &[&str] = &["KiB", "MiB", "GiB", "TiB"];
		if self.0 < BASE {
			return write!(f, "{}B", self.0);
		}
		let mut divisor = BASE;
		let mut unit = 0;
		while unit + 1 < UNITS.len() && self.0 / divisor >= BASE {
			divisor *= BASE;
			unit += 1;
		}
		write!(f, "{:.2}{}", self.0 as f64 / divisor as f64, UNITS[unit])
	}
}

impl From<u64> for BytesCount {
	fn from(n: u64) -> Self {
		Self(n)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bytes_count_display() {
		const KIB: u64 = 1024;
		const MIB: u64 = KIB * 1024;
		const GIB: u64 = MIB * 1024;
		const TIB: u64 = GIB * 1024;

		assert_eq!(BytesCount(0).to_string(), "0B");
		assert_eq!(BytesCount(22).to_string(), "22B");
		assert_eq!(BytesCount(1023).to_string(), "1023B");

		assert_eq!(BytesCount(KIB).to_string(), "1.00KiB");
		assert_eq!(BytesCount(1536).to_string(), "1.50KiB");
		assert_eq!(BytesCount(8888).to_string(), "8.68KiB");
		assert_eq!(BytesCount(MIB - 1).to_string(), "1024.00KiB");

		assert_eq!(BytesCount(MIB).to_string(), "1.00MiB");
		assert_eq!(BytesCount(1536 * KIB).to_string(), "1.50MiB");
		assert_eq!(BytesCount(GIB).to_string(), "1.00GiB");
		assert_eq!(BytesCount(3 * TIB).to_string(), "3.00TiB");
		assert_eq!(BytesCount(2048 * TIB).to_string(), "2048.00TiB");
	}
}
