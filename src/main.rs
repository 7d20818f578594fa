use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use jdtsd::{
    application::Application,
    cli::Cli,
    config::{ConfigManager, DeviceCfg},
};

const DAEMON_LOG: &str = "/var/tmp/jdtsd.log";

// pid 0: the logger is built before the fork.
fn syslog_formatter() -> Formatter3164 {
    Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "jdtsd".into(),
        pid: 0,
    }
}

fn init_syslog(level: LevelFilter) -> Result<()> {
    syslog::unix(syslog_formatter())
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn init_terminal_log(level: LevelFilter) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.as_str().to_lowercase()),
    )
    .init();
}

fn into_daemon() -> Result<()> {
    File::create(DAEMON_LOG)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .with_context(|| format!("Cannot create {DAEMON_LOG}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load_or_default(cli.config).await?;

    if cli.simulate {
        let mut config = config_manager.get_mut().await;
        if !matches!(config.device, DeviceCfg::Simulated { .. }) {
            config.device = DeviceCfg::Simulated { failure_rate: 0.0 };
        }
        info!("Simulation requested, not touching the device node");
    }

    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .run()
        .await
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Fork before the runtime spawns its worker threads.
    if cli.daemonize {
        init_syslog(level).and(into_daemon())?;
    } else {
        init_terminal_log(level);
    }

    info!("jdtsd {} starting", env!("CARGO_PKG_VERSION"));
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(run(cli))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_lines_carry_no_stale_pid() {
        let formatter = syslog_formatter();
        assert_eq!(formatter.pid, 0);
        assert_eq!(formatter.process, "jdtsd");
        assert!(matches!(formatter.facility, Facility::LOG_USER));
    }
}
