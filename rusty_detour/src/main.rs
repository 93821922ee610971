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

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::default_trait_access)]

mod args;
mod config;

use args::{Action, ActionCommons, AppOptions, CacheAction, ConfigSource};
use config::Config;
use detour_lib::{BlockStatus, CacheClient};
use std::{borrow::Cow, io, sync::Arc};
use tokio::runtime::Runtime;

type BoxStdErr = Box<dyn std::error::Error + Send + Sync>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
enum Error {
	#[error("[IO error] {0}")]
	Io(#[from] io::Error),
	#[error("[input] {0}")]
	Input(Cow<'static, str>),
	#[error("[config] {0}")]
	Config(BoxStdErr),
	#[error("[runtime] {0}")]
	Runtime(BoxStdErr),
}

fn read_config(source: &ConfigSource, coms: ActionCommons) -> Result<Config, Error> {
	let conf_str = std::fs::read_to_string(&source.path).map_err(|e| {
		Error::Input(format!("cannot read config '{}' ({})", source.path.display(), e).into())
	})?;
	let mut conf = Config::parse(source.format, &conf_str).map_err(Error::Config)?;
	conf.log.override_with(coms.log, coms.log_out.as_deref());
	Ok(conf)
}

fn serve(conf: Config) -> Result<(), Error> {
	conf.log.init_logger().map_err(Error::Config)?;
	let server = Arc::new(
		conf.server
			.build()
			.map_err(|e| Error::Config(Box::new(e)))?,
	);
	let rt = Runtime::new()?;
	rt.block_on(server.serve()).map_err(Error::Runtime)
}

fn run_cache_action(action: CacheAction) -> Result<(), Error> {
	let (conf, domain, status) = match action {
		CacheAction::Lookup {
			coms,
			source,
			domain,
		} => (read_config(&source, coms)?, domain, None),
		CacheAction::Mark {
			coms,
			source,
			domain,
			status,
		} => {
			let status: BlockStatus = status
				.parse()
				.map_err(|e| Error::Input(format!("{}", e).into()))?;
			(read_config(&source, coms)?, domain, Some(status))
		}
	};
	conf.log.init_logger().map_err(Error::Config)?;
	let cache: CacheClient = conf
		.server
		.cache
		.build()
		.map_err(|e| Error::Config(Box::new(e)))?;

	let rt = Runtime::new()?;
	rt.block_on(async move {
		if let Some(flags) = status {
			let new_status = cache.mark(&domain, flags).await?;
			println!("{} {}", domain, new_status);
		} else {
			match cache.try_lookup(&domain).await? {
				Some(status) => println!("{} {}", domain, status),
				None => println!("{} not found", domain),
			}
		}
		Ok::<_, detour_lib::cache::Error>(())
	})
	.map_err(|e| Error::Runtime(Box::new(e)))
}

fn run(action: Action) -> Result<(), Error> {
	match action {
		Action::CheckVersion => {
			println!("{}", VERSION);
			Ok(())
		}
		Action::Serve { coms, source } => serve(read_config(&source, coms)?),
		Action::Cache(action) => run_cache_action(action),
	}
}

fn main() {
	let opts = AppOptions::new_from_args();
	let action = match opts.into_action() {
		Ok(action) => action,
		Err(e) => {
			println!("Invalid arguments: {}", e);
			std::process::exit(exitcode::USAGE);
		}
	};
	if let Err(err) = run(action) {
		println!("Error happened during initialization:\n {}\n", err);
		std::process::exit(match err {
			Error::Io(_) => exitcode::IOERR,
			Error::Input(_) | Error::Config(_) => exitcode::CONFIG,
			Error::Runtime(_) => exitcode::SOFTWARE,
		});
	}
}
