// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

use clap::Parser;
use tracing::{debug, error};

mod assemble;
mod capture;
mod chunker;
mod cmds;
mod config;
mod diskpool;
mod ffmpeg;
mod janitor;
mod json;
mod queue;
mod state;
mod web;

/// Pitchside NVR: sports-venue video recorder and clip-delivery appliance.
#[derive(Debug, Parser)]
#[command(name = "pitchside-nvr", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Create the state directory and database.
    Init(cmds::init::Args),
    /// Record cameras and serve the clip-request API.
    Run(cmds::run::Args),
}

fn main() {
    base::tracing_setup::install();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Init(a) => cmds::init::run(a),
        Command::Run(a) => cmds::run::run(a),
    };
    match result {
        Err(e) => {
            error!(err = %e.chain(), "exiting due to error");
            std::process::exit(1);
        }
        Ok(rv) => {
            debug!("exiting with status {rv}");
            std::process::exit(rv);
        }
    }
}
