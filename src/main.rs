// tunnelkeeper - SSH 隧道守护
// 命令行入口

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tunnelkeeper::services::{self, TunnelConfig};
use tunnelkeeper::ssh::{self, TracingSink, TunnelSupervisor};

mod cli;

use cli::{Cli, Command};

fn main() -> Result<()> {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug tunnelkeeper run
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false) // 不显示 target（模块路径）
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tunnelkeeper-worker")
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => services::default_config_path()?,
    };

    match cli.command {
        Command::Run => run(&config_path).await,
        Command::Check { json } => check(&config_path, json),
        Command::Upload { local, remote } => {
            let config = load_config(&config_path)?;
            ssh::upload(&config.connection, &local, &remote, TracingSink::shared())
                .await
                .with_context(|| format!("Upload of {} failed", local.display()))?;
            info!("Uploaded {} to {}:{}", local.display(), config.connection.host, remote);
            Ok(())
        }
        Command::Download { remote, local } => {
            let config = load_config(&config_path)?;
            ssh::download(&config.connection, &remote, &local, TracingSink::shared())
                .await
                .with_context(|| format!("Download of {} failed", remote))?;
            info!("Downloaded {}:{} to {}", config.connection.host, remote, local.display());
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<TunnelConfig> {
    services::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let forwards = config.forwards.clone();

    let mut supervisor =
        TunnelSupervisor::new(config.connection).with_poll_interval(config.poll_interval);
    for spec in forwards {
        supervisor.add_forward(spec).await?;
    }

    supervisor.start();
    info!("[Main] Supervising tunnels, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("[Main] Shutting down");
    supervisor.stop().await;
    Ok(())
}

fn check(config_path: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let summary = config.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}@{}:{} (poll every {}s)",
        summary.user, summary.host, summary.port, summary.poll_interval_secs
    );
    for keyfile in &summary.keyfiles {
        println!("  keyfile {}", keyfile.display());
    }
    for forward in summary.forwards {
        println!("  {}", forward);
    }
    Ok(())
}
