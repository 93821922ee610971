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

use super::BoxStdErr;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;

use super::config::Format;

#[derive(Parser)]
#[command(name = "rusty_detour")]
pub struct AppOptions {
	/// Set the format of the config file. Can be 'toml' (default) or 'json'.
	#[arg(short, long)]
	format: Option<Format>,

	/// Read config from file.
	#[arg(short, long, value_name = "FILE")]
	config: Option<String>,

	/// Print version.
	#[arg(long)]
	version: bool,

	/// Print the block status of a domain from the configured cache, then exit.
	#[arg(long, value_name = "DOMAIN")]
	lookup: Option<String>,

	/// Add flags given by --status into the block status of a domain, then exit.
	#[arg(long, value_name = "DOMAIN", requires = "status", conflicts_with = "lookup")]
	mark: Option<String>,

	/// Flags used by --mark, either an integer or names separated by '|',
	/// e.g. 'TCP_BLOCKED|TCP_RESET'.
	#[arg(long, value_name = "FLAGS", requires = "mark")]
	status: Option<String>,

	/// Set the log level. Must be one of ["off", "error", "warn", "info" (default), "debug", "trace"]
	#[arg(long, value_name = "LEVEL")]
	log: Option<log::LevelFilter>,

	/// Set the output file for log.
	#[arg(long, value_name = "FILE")]
	log_out: Option<String>,
}

impl AppOptions {
	pub fn new_from_args() -> Self {
		Self::parse()
	}

	pub fn into_action(self) -> Result<Action, BoxStdErr> {
		if self.version {
			return Ok(Action::CheckVersion);
		}

		let coms = ActionCommons {
			log: self.log,
			log_out: self.log_out,
		};

		let path = if let Some(path) = self.config {
			PathBuf::from(path)
		} else {
			let mut cmd = Self::command();
			cmd.print_help()?;
			return Err("missing --config".into());
		};
		let format = self.format.unwrap_or_else(|| {
			let mut format = Format::default();
			if let Some(ext) = path.extension() {
				if ext.eq_ignore_ascii_case("json") {
					format = Format::Json;
				}
			}
			format
		});
		let source = ConfigSource { path, format };

		if let Some(domain) = self.lookup {
			return Ok(Action::Cache(CacheAction::Lookup {
				coms,
				source,
				domain,
			}));
		}
		if let Some(domain) = self.mark {
			let status = self.status.ok_or("missing --status")?;
			return Ok(Action::Cache(CacheAction::Mark {
				coms,
				source,
				domain,
				status,
			}));
		}
		Ok(Action::Serve { coms, source })
	}
}

pub enum Action {
	CheckVersion,
	Serve {
		coms: ActionCommons,
		source: ConfigSource,
	},
	Cache(CacheAction),
}

pub struct ActionCommons {
	pub log: Option<log::LevelFilter>,
	/// Raw `--log-out` value, replaces the output in the config file if set.
	pub log_out: Option<String>,
}

pub struct ConfigSource {
	pub path: PathBuf,
	pub format: Format,
}

/// One-shot operations on the block status cache.
pub enum CacheAction {
	Lookup {
		coms: ActionCommons,
		source: ConfigSource,
		domain: String,
	},
	Mark {
		coms: ActionCommons,
		source: ConfigSource,
		domain: String,
		status: String,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	fn action(args: &[&str]) -> Action {
		AppOptions::try_parse_from(args)
			.unwrap()
			.into_action()
			.unwrap()
	}

	#[test]
	fn test_serve_action() {
		match action(&["rusty_detour", "-c", "detour.json", "--log", "debug"]) {
			Action::Serve { coms, source } => {
				assert!(matches!(source.format, Format::Json));
				assert_eq!(coms.log, Some(log::LevelFilter::Debug));
				assert!(coms.log_out.is_none());
			}
			_ => panic!("expected serve action"),
		}
	}

	#[test]
	fn test_cache_actions() {
		match action(&["rusty_detour", "-c", "a.toml", "--lookup", "blocked.example"]) {
			Action::Cache(CacheAction::Lookup { domain, source, .. }) => {
				assert_eq!(domain, "blocked.example");
				assert!(matches!(source.format, Format::Toml));
			}
			_ => panic!("expected lookup action"),
		}
		match action(&[
			"rusty_detour",
			"-c",
			"a.toml",
			"--mark",
			"blocked.example",
			"--status",
			"TCP_BLOCKED",
			"--log-out",
			"@none",
		]) {
			Action::Cache(CacheAction::Mark {
				domain,
				status,
				coms,
				..
			}) => {
				assert_eq!(domain, "blocked.example");
				assert_eq!(status, "TCP_BLOCKED");
				assert_eq!(coms.log_out.as_deref(), Some("@none"));
			}
			_ => panic!("expected mark action"),
		}
		assert!(AppOptions::try_parse_from(&["rusty_detour", "-c", "a.toml", "--mark", "x"]).is_err());
	}
}
