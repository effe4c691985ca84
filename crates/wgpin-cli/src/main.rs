// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod commands;
mod host;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::{ConfigArgs, LocateArgs, UpArgs};

/// Certificate-pinned WireGuard session client.
#[derive(Debug, Parser)]
#[command(name = "wgpin", version, about)]
struct Cli {
	/// Emit logs as JSON lines
	#[arg(long, global = true)]
	log_json: bool,

	/// Log at debug level unless RUST_LOG says otherwise
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Generate a key pair, register it and print the gateway's reply
	Register(ConfigArgs),
	/// Scan this process's descriptors for a tunnel interface
	Locate(LocateArgs),
	/// Bring the tunnel up and supervise it until Ctrl+C
	Up(UpArgs),
}

fn init_tracing(json: bool, verbose: bool) {
	let default_level = if verbose { "debug" } else { "info" };
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	let registry = tracing_subscriber::registry().with(filter);

	if json {
		registry
			.with(
				tracing_subscriber::fmt::layer()
					.json()
					.with_writer(std::io::stderr),
			)
			.init();
	} else {
		registry
			.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
			.init();
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.log_json, cli.verbose);

	match cli.command {
		Command::Register(args) => commands::register::handle(args).await,
		Command::Locate(args) => commands::locate::handle(args),
		Command::Up(args) => commands::up::handle(args).await,
	}
}
