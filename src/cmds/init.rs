// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Creates the state directory and database. Idempotent.

use crate::config;
use base::{Error, ErrorKind, ResultExt};
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = super::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = config::read_config(&args.config)?;
    std::fs::create_dir_all(&config.state_dir).err_kind(ErrorKind::Internal)?;
    let db_path = config.state_dir.join("videos.db");
    let conn = db::db::open_or_init(&db_path)?;
    drop(conn);
    info!(path = %db_path.display(), "database ready");
    Ok(0)
}
