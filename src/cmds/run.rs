// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The `run` subcommand: wires every component and runs until signalled.

use crate::assemble::Assembler;
use crate::capture::supervisor::Supervisor;
use crate::capture::worker;
use crate::chunker::Chunker;
use crate::config::{self, ConfigFile};
use crate::diskpool::DiskPool;
use crate::janitor::Janitor;
use crate::queue::notify::{NotifyHandler, VenueApiNotifier};
use crate::queue::upload::{HttpBlobStore, UploadHandler};
use crate::queue::{Connectivity, Scheduler};
use crate::state;
use crate::web;
use base::clock::{Clocks, RealClocks};
use base::{bail, err, Error, ErrorKind, ResultExt};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = super::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = config::read_config(&args.config)?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(worker_threads) = config.worker_threads {
        builder.worker_threads(worker_threads);
    }
    let rt = builder.build().err_kind(ErrorKind::Internal)?;
    let r = rt.block_on(async_run(config));

    // In the graceful path, everything we care about has already been
    // joined with logging; don't wait on stragglers.
    rt.shutdown_background();
    r
}

async fn async_run(config: ConfigFile) -> Result<i32, Error> {
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let mut shutdown_tx = Some(shutdown_tx);

    let mut int = signal(SignalKind::interrupt()).err_kind(ErrorKind::Internal)?;
    let mut term = signal(SignalKind::terminate()).err_kind(ErrorKind::Internal)?;
    tokio::pin! {
        let inner = inner(config, shutdown_rx);
    }

    tokio::select! {
        _ = int.recv() => {
            info!("received SIGINT; shutting down gracefully. \
                   Send another SIGINT or SIGTERM to shut down immediately.");
            shutdown_tx.take();
        },
        _ = term.recv() => {
            info!("received SIGTERM; shutting down gracefully. \
                   Send another SIGINT or SIGTERM to shut down immediately.");
            shutdown_tx.take();
        },
        result = &mut inner => return result,
    }

    tokio::select! {
        _ = int.recv() => bail!(Cancelled, msg("immediate shutdown due to second signal (SIGINT)")),
        _ = term.recv() => bail!(Cancelled, msg("immediate shutdown due to second signal (SIGTERM)")),
        result = &mut inner => result,
    }
}

async fn inner(config: ConfigFile, shutdown_rx: base::shutdown::Receiver) -> Result<i32, Error> {
    let clocks: Arc<dyn Clocks> = Arc::new(RealClocks);

    std::fs::create_dir_all(&config.state_dir).err_kind(ErrorKind::Internal)?;
    let conn = db::db::open(&config.state_dir.join("videos.db"))?;
    let db = Arc::new(db::Database::new(conn)?);
    info!("database is loaded");

    // Fatal when no disk qualifies at startup: a recorder with nowhere to
    // record is misconfigured, not degraded.
    let (diskpool, active_disk_rx) = DiskPool::new(db.clone(), &config.storage, clocks.clone())?;
    let active = diskpool.require_eligible_active()?;
    info!(disk = %active.id, path = %active.path.display(), "active disk selected");

    let restored = state::load(&config.state_dir).cameras;
    let env = worker::Environment {
        db: db.clone(),
        clocks: clocks.clone(),
        transcoder: config.transcoder.clone(),
        segment_secs: config.storage.segment_duration_secs,
    };
    let supervisor = Supervisor::new(
        env,
        config.cameras.clone(),
        active_disk_rx.clone(),
        restored,
    );
    let started = supervisor.start_all();
    info!(workers = started, "capture workers started");

    let (online_tx, online_rx) = tokio::sync::watch::channel(true);
    let store = Arc::new(HttpBlobStore::new(&config.object_store));
    let notifier = VenueApiNotifier::new(&config.upstream);
    let upload_handler = UploadHandler::new(
        db.clone(),
        clocks.clone(),
        store,
        config.queue.notify_max_attempts,
    );
    let notify_handler = NotifyHandler::new(db.clone(), clocks.clone(), notifier);
    let scheduler = Scheduler::new(
        db.clone(),
        clocks.clone(),
        config.queue.clone(),
        online_rx.clone(),
        upload_handler,
        notify_handler,
    );
    let assembler = Arc::new(Assembler::new(
        db.clone(),
        clocks.clone(),
        config.transcoder.clone(),
        config.assembly.clone(),
        config.watermark.clone(),
        active_disk_rx.clone(),
    ));
    let chunker = Chunker::new(
        db.clone(),
        clocks.clone(),
        config.transcoder.clone(),
        config.chunker.clone(),
        config.storage.segment_duration_secs,
        config
            .cameras
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect(),
    );
    let janitor = Janitor::new(
        db.clone(),
        clocks.clone(),
        &config.queue,
        config.cameras.clone(),
    );
    let connectivity = Connectivity::new(&config.queue);

    let mut background = vec![
        ("disk pool", tokio::spawn(diskpool.clone().run(shutdown_rx.clone()))),
        ("chunker", tokio::spawn(chunker.run(shutdown_rx.clone()))),
        ("scheduler", tokio::spawn(scheduler.run(shutdown_rx.clone()))),
        ("janitor", tokio::spawn(janitor.run(shutdown_rx.clone()))),
        (
            "connectivity",
            tokio::spawn(connectivity.run(online_tx, shutdown_rx.clone())),
        ),
        (
            "state persister",
            tokio::spawn(state::run_persister(
                supervisor.clone(),
                config.state_dir.clone(),
                shutdown_rx.clone(),
            )),
        ),
    ];

    let svc = Arc::new(web::Service::new(web::Config {
        db: db.clone(),
        clocks: clocks.clone(),
        cameras: config.cameras.clone(),
        supervisor: supervisor.clone(),
        assembler,
        diskpool: diskpool.clone(),
        online_rx,
        shutdown_rx: shutdown_rx.clone(),
        queue_cfg: config.queue.clone(),
        assembly_cfg: config.assembly.clone(),
    }));
    let make_svc = hyper::service::make_service_fn(move |_conn| {
        let svc = Arc::clone(&svc);
        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req| {
                Arc::clone(&svc).serve(req)
            }))
        }
    });
    let server = hyper::Server::try_bind(&config.bind)
        .map_err(|e| err!(Unavailable, msg("unable to bind to {}", config.bind), source(e)))?
        .tcp_nodelay(true)
        .serve(make_svc);
    let graceful_rx = shutdown_rx.clone();
    let server = server.with_graceful_shutdown(async move { graceful_rx.wait().await });
    let web_handle = tokio::spawn(server);

    info!(bind = %config.bind, "ready to serve requests");
    shutdown_rx.wait().await;

    info!("shutting down capture workers");
    supervisor.shutdown_all().await;

    info!("waiting for background tasks");
    for (name, handle) in background.drain(..) {
        match tokio::time::timeout(std::time::Duration::from_secs(30), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(task = name, err = %e, "background task panicked"),
            Err(_) => tracing::warn!(task = name, "background task did not stop in time"),
        }
    }

    info!("waiting for HTTP requests to finish");
    web_handle
        .await
        .err_kind(ErrorKind::Internal)?
        .err_kind(ErrorKind::Internal)?;

    info!("exiting");
    Ok(0)
}
