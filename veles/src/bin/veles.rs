// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::path::PathBuf;

use clap::Parser;

use veles::config::Config;
use veles::{server, Error};

/// Single-threaded MQTT 5.0 broker.
#[derive(Debug, Parser)]
#[command(name = "veles", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured listening host.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Override the configured listening port.
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    veles::log::init_log(config.log_verbosity)?;
    server::run(&config)
}
