/*
 * vHook SMTP to webhook relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use anyhow::Context;
use clap::Parser;
use vhook::{Args, Commands};
use vhook_config::Config;
use vhook_server::{socket_bind_anyhow, start_runtime};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("vHook terminating error: '{err}'");
        err.chain()
            .skip(1)
            .for_each(|cause| eprintln!("because: {cause}"));
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(std::path::Path::new(path))
            .context("cannot load the configuration")?
            .from_env_overlay()?,
        None => Config::from_env()?,
    };

    if let Some(command) = args.command {
        match command {
            Commands::ConfigShow => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }
            Commands::ConfigDiff => {
                let loaded = serde_json::to_string_pretty(&config)?;
                let default = serde_json::to_string_pretty(&Config::default())?;
                for diff in diff::lines(&default, &loaded) {
                    match diff {
                        diff::Result::Left(left) => println!("-\x1b[0;31m{left}\x1b[0m"),
                        diff::Result::Both(same, _) => println!(" {same}"),
                        diff::Result::Right(right) => println!("+\x1b[0;32m{right}\x1b[0m"),
                    }
                }
                return Ok(());
            }
            _ => unreachable!("Commands is exhaustively matched above"),
        }
    }

    vhook::tracing_subscriber::initialize(&config)?;

    tracing::info!(
        addr = %config.server.addr,
        secure = config.server.secure,
        production = config.production,
        "vHook starting."
    );

    let listener = socket_bind_anyhow(config.server.addr)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_runtime(config, listener))
}
