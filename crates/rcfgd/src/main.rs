// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rcfgd daemon entry point
//!
//! Loads the nvram store, starts the master, and supervises it until a stop
//! request arrives from a control client or a signal.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config and socket paths
//! rcfgd
//!
//! # Custom nvram file and control socket
//! rcfgd --config /tmp/test.conf --ctrl-socket /tmp/test.ctl
//!
//! # Pin the log level (overrides common.log_level from nvram)
//! rcfgd --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use rcfgd::config;
use rcfgd::{logging, Master, MasterOptions, MasterState, NvramStore, PendingRequest};

#[derive(Parser)]
#[command(name = "rcfgd")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Router configuration daemon - nvram-driven control and config services")]
#[command(long_about = None)]
struct Cli {
    /// Nvram config file to load and commit to
    #[arg(short, long, default_value = config::DEF_CONFIG_PATH)]
    config: PathBuf,

    /// Unix socket path for the control protocol
    #[arg(short = 's', long, default_value = config::DEF_CTRL_SOCK_PATH)]
    ctrl_socket: String,

    /// Unix socket path for the SOAP nvram endpoint (empty string disables it)
    #[arg(long, default_value = config::DEF_NVRAM_SOCK_PATH)]
    nvram_socket: String,

    /// Upper bound on worker threads
    #[arg(short, long, default_value_t = config::DEF_THREADS_MAX)]
    threads_max: usize,

    /// Log level (trace, debug, info, warn, error); overrides common.log_level
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let override_level = match args.log_level.as_deref() {
        Some(value) => match logging::parse_level(value) {
            Some(level) => Some(level),
            None => bail!("unknown log level '{}'", value),
        },
        None => None,
    };
    logging::init(override_level.unwrap_or(log::LevelFilter::Info))
        .context("logger already installed")?;

    let nvram = Arc::new(NvramStore::with_file(&args.config));
    let loaded = nvram
        .load()
        .with_context(|| format!("load nvram config {}", args.config.display()))?;
    info!(
        "[main] rcfgd {} starting, {} nvram keys from {}",
        rcfgd::VERSION,
        loaded,
        args.config.display()
    );

    let options = MasterOptions {
        ctrl_path: args.ctrl_socket,
        nvram_sock_path: if args.nvram_socket.is_empty() {
            None
        } else {
            Some(args.nvram_socket)
        },
        threads_max: args.threads_max,
        log_level: override_level,
        ..MasterOptions::default()
    };

    let master = Arc::new(Master::new(nvram, options));
    master.start().context("start master")?;
    ctrlc_handler(Arc::clone(&master));

    // Requests come from ctrl clients and signals; this thread performs them
    // so reload and stop never run on a worker that would have to drain itself.
    loop {
        match master.take_request() {
            Some(PendingRequest::Stop) => {
                info!("[main] stop requested");
                master.stop();
                break;
            }
            Some(PendingRequest::Reload) => {
                if let Err(e) = master.reload() {
                    log::error!("[main] reload failed: {}", e);
                }
            }
            None => {
                if master.state() == MasterState::Stopped {
                    break;
                }
                thread::sleep(config::STOP_POLL_INTERVAL);
            }
        }
    }

    info!("[main] rcfgd exiting");
    Ok(())
}

/// Route Ctrl+C into a stop request.
fn ctrlc_handler(master: Arc<Master>) {
    let _ = ctrlc::set_handler(move || {
        info!("[main] signal received, shutting down");
        master.request_stop();
    });
}
