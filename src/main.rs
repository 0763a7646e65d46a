/*
 *  main.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Command line entry point
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use anyhow::Context;
use env_logger::Env;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)] // Only compile this block on Unix-like systems
use tokio::signal::unix::{signal, SignalKind}; // Import specific Unix signals

use lymatrix::{config, DisplayEngine};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
/// always unix so forget the cfg
async fn signal_handler() -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        },
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load().context("loading configuration")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log_level.as_str()))
        .format_timestamp_millis()
        .init();

    info!("This {} worth the Squeeze", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let mut engine = DisplayEngine::new(settings).context("initializing display engine")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    // the render loop blocks on audio reads and vsync, keep it off the runtime workers
    let mut render = tokio::task::spawn_blocking(move || engine.run(&flag));

    let finished = tokio::select! {
        res = signal_handler() => {
            if let Err(e) = res {
                error!("Cannot install signal handlers, shutting down: {:#}", e);
            }
            None
        }
        res = &mut render => Some(res),
    };

    let outcome = match finished {
        Some(res) => res,
        None => {
            running.store(false, Ordering::Relaxed);
            render.await
        }
    };

    match outcome.context("render loop panicked")? {
        Ok(()) => {
            info!("Main application exiting. Display cleared.");
            Ok(())
        }
        Err(e) => {
            error!("Render loop failed: {:#}", e);
            Err(e)
        }
    }
}
