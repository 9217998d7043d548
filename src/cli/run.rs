//! The `run` subcommand.

use std::sync::Arc;
use std::time::Duration;

use colored::*;
use eyre::{Context, Result};
use log::info;

use prochost::channel::BootstrapBroker;
use prochost::child::{ChildProcessData, ChildProcessObserver};
use prochost::config::Config;
use prochost::host::{DefaultEmbedderPolicy, HostRequests, HostSnapshot, ProcessHostObserver, TerminationInfo};
use prochost::launch::{CommandLauncher, ProcessLauncher};
use prochost::orchestrator::HostRequest;
use prochost::runtime::{HostRuntime, LauncherFactory};
use prochost::testing::FakeLauncher;
use prochost::threading::TaskExecutor;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub hosts: usize,
    pub duration: Option<Duration>,
    pub fake: bool,
    pub warm_spare: bool,
}

/// Prints host and child lifecycle events.
struct ConsoleObserver;

impl ProcessHostObserver for ConsoleObserver {
    fn host_launched(&self, host: &HostSnapshot) {
        println!("{} host {} pid {:?}", "launched".cyan(), host.id, host.pid);
    }

    fn host_ready(&self, host: &HostSnapshot) {
        println!("{} host {} in {}", "ready".green(), host.id, host.context);
    }

    fn host_exited(&self, host: &HostSnapshot, info: &TerminationInfo, _requests: &mut HostRequests) {
        let line = format!("host {} {:?} ({})", host.id, info.status, info.exit_code);
        if info.status.is_crash() || info.status.is_killed() {
            println!("{} {}", "died".red(), line);
        } else {
            println!("{} {}", "exited".yellow(), line);
        }
    }

    fn host_destroyed(&self, host: &HostSnapshot) {
        println!("{} host {}", "destroyed".dimmed(), host.id);
    }
}

impl ChildProcessObserver for ConsoleObserver {
    fn host_launched_and_connected(&self, data: &ChildProcessData) {
        println!("{} child {} ({})", "connected".green(), data.id, data.name);
    }

    fn host_disconnected(&self, data: &ChildProcessData) {
        println!("{} child {} ({})", "disconnected".yellow(), data.id, data.name);
    }

    fn host_crashed(&self, data: &ChildProcessData, info: &TerminationInfo) {
        println!("{} child {} ({}): {}", "crashed".red(), data.id, data.name, info.exit_code);
    }

    fn host_killed(&self, data: &ChildProcessData, info: &TerminationInfo) {
        println!("{} child {} ({}): {}", "killed".red(), data.id, data.name, info.exit_code);
    }
}

fn launcher_factory(fake: bool) -> LauncherFactory {
    if fake {
        Box::new(|_: Arc<TaskExecutor>, broker: Arc<BootstrapBroker>| {
            FakeLauncher::auto(broker) as Arc<dyn ProcessLauncher>
        })
    } else {
        Box::new(|executor: Arc<TaskExecutor>, broker: Arc<BootstrapBroker>| {
            Arc::new(CommandLauncher::new(executor, broker)) as Arc<dyn ProcessLauncher>
        })
    }
}

pub fn run(config: &Config, options: RunOptions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(run_hosts(config, options))
}

async fn run_hosts(config: &Config, options: RunOptions) -> Result<()> {
    info!("Running with {:?}", options);
    let host_runtime = HostRuntime::start(config, launcher_factory(options.fake), Arc::new(DefaultEmbedderPolicy))
        .context("Failed to start host runtime")?;

    let observer = Arc::new(ConsoleObserver);
    let ids = host_runtime
        .call(move |o| -> prochost::Result<Vec<i32>> {
            o.add_child_observer(observer.clone());
            let context = o.create_context();
            if options.warm_spare {
                o.warmup_spare(&context);
            }
            let mut ids = Vec::with_capacity(options.hosts);
            for _ in 0..options.hosts {
                let id = o.get_process_host(&HostRequest::new(context.clone()))?;
                o.add_observer(id, observer.clone())?;
                ids.push(id);
            }
            Ok(ids)
        })
        .await??;
    println!("{} {:?}", "Requested hosts".bold(), ids);

    match options.duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => {
            println!("{}", "Press Ctrl-C to stop".dimmed());
            tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
        }
    }

    let (live, spare, stats) = host_runtime
        .call(|o| (o.host_count(), o.spare_host(), o.spare().stats().clone()))
        .await?;
    println!(
        "{} {} live hosts, spare {:?}, spare hit rate {:.0}%",
        "Summary:".bold(),
        live,
        spare,
        stats.hit_rate() * 100.0
    );

    tokio::task::spawn_blocking(move || host_runtime.shutdown())
        .await
        .context("Shutdown task failed")?;
    println!("{}", "Stopped".green());
    Ok(())
}
