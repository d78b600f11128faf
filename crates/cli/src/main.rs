// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod driver;
mod transport;

use std::sync::Arc;

use clap::Parser;
use orchkernel::config::KernelConfig;
use orchkernel::driver::TerminalDriver;
use orchkernel::facade::Facade;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::driver::NullTerminalDriver;

#[derive(Debug, Clone, Parser)]
#[command(name = "orchctl", about = "Multi-agent terminal orchestration control plane")]
struct CliConfig {
    #[command(flatten)]
    kernel: KernelConfig,

    /// HTTP bind address.
    #[arg(long, env = "ORCH_HTTP_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// HTTP bind port.
    #[arg(long, env = "ORCH_HTTP_PORT", default_value = "7890")]
    port: u16,
}

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();
    init_tracing(&config.kernel.log_format, &config.kernel.log_level);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(log_format: &str, log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(config: CliConfig) -> anyhow::Result<()> {
    let driver: Arc<dyn TerminalDriver> = Arc::new(NullTerminalDriver::new());
    let facade = Arc::new(Facade::new(driver, config.kernel).await.map_err(|e| anyhow::anyhow!(e.to_string()))?);

    let router = transport::build_router(Arc::clone(&facade));
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "orchctl listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(Arc::clone(&facade))).await?;
    Ok(())
}

async fn shutdown_signal(facade: Arc<Facade>) {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install ctrl-c handler");
        return;
    }
    info!("shutdown signal received, draining");
    facade.shutdown().await;
}
