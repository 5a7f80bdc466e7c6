mod cli;
mod ctrlc;
mod sinks;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;

use da_common::config::{self, Mode};
use da_common::hosts::HostsTable;
use da_common::log::LogWriter;
use da_core::beb::BestEffortBroadcast;
use da_core::fifo::UniformFifo;
use da_core::la::LatticeAgreement;
use da_core::pl::PerfectLinkManager;
use da_core::urb::UniformReliableBroadcast;
use da_transport::{spawn_periodic, DatagramEndpoint};

use cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(true)
        .compact()
        .init();

    let mode: Mode = cli.mode.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let hosts = HostsTable::parse(&cli.hosts)
        .with_context(|| format!("loading hosts file {}", cli.hosts.display()))?;
    if !hosts.contains(cli.id) {
        anyhow::bail!("process id {} is not present in {}", cli.id, cli.hosts.display());
    }

    let log = Arc::new(
        LogWriter::create(&cli.output)
            .with_context(|| format!("opening output log {}", cli.output.display()))?,
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::handle(move || running.store(false, Ordering::SeqCst));
    }

    let pl = Arc::new(PerfectLinkManager::new());
    let endpoint = DatagramEndpoint::bind(cli.id, &hosts, pl.clone())?;
    let n = hosts.len();

    let mut background: Vec<std::thread::JoinHandle<()>> = Vec::new();

    match mode {
        Mode::Pl => {
            let config_path = cli
                .config_path
                .ok_or_else(|| anyhow::anyhow!("pl mode requires a config file"))?;
            let cfg = config::parse_pl(&config_path)
                .with_context(|| format!("loading config {}", config_path.display()))?;

            let logger = sinks::PlDeliveryLogger::new(log.clone());
            pl.subscribe(logger);

            endpoint.start();

            if cli.id != cfg.receiver_id {
                let pl = pl.clone();
                let log = log.clone();
                let n_messages = cfg.n_messages;
                let receiver = cfg.receiver_id;
                background.push(
                    std::thread::Builder::new()
                        .name("pl-sender".into())
                        .spawn(move || {
                            for _ in 0..n_messages {
                                if let Some(seq) = pl.send(receiver, Bytes::new()) {
                                    log.log_broadcast(seq);
                                }
                            }
                        })
                        .expect("failed to spawn pl-sender thread"),
                );
            }
        }

        Mode::Fifo => {
            let config_path = cli
                .config_path
                .ok_or_else(|| anyhow::anyhow!("fifo mode requires a config file"))?;
            let cfg = config::parse_fifo(&config_path)
                .with_context(|| format!("loading config {}", config_path.display()))?;

            let beb = BestEffortBroadcast::new(cli.id, pl.clone(), Some(log.clone()));
            pl.subscribe(beb.clone());
            let urb = UniformReliableBroadcast::new(cli.id, n, beb.clone());
            beb.subscribe(urb.clone());
            let fifo = UniformFifo::new(urb.clone());
            urb.subscribe(fifo.clone());
            fifo.subscribe(sinks::FifoDeliveryLogger::new(log.clone()));

            endpoint.start();

            let urb_tick = urb.clone();
            background.push(spawn_periodic(
                format!("urb-tick-{}", cli.id),
                Duration::from_millis(da_core::urb::DELIVER_TICK_MS),
                running.clone(),
                move || urb_tick.tick(),
            ));

            let n_messages = cfg.n_messages;
            let broadcaster = urb.clone();
            background.push(
                std::thread::Builder::new()
                    .name("fifo-broadcaster".into())
                    .spawn(move || {
                        for _ in 0..n_messages {
                            broadcaster.broadcast(Bytes::new());
                        }
                    })
                    .expect("failed to spawn fifo-broadcaster thread"),
            );
        }

        Mode::Lattice => {
            let config_path = cli
                .config_path
                .ok_or_else(|| anyhow::anyhow!("lattice mode requires a config file"))?;
            let cfg = config::parse_lattice(&config_path)
                .with_context(|| format!("loading config {}", config_path.display()))?;

            let beb = BestEffortBroadcast::new(cli.id, pl.clone(), None);
            pl.subscribe(beb.clone());
            let la = LatticeAgreement::new(n, beb.clone(), Some(log.clone()));
            beb.subscribe(la.clone());

            endpoint.start();

            let la_tick = la.clone();
            background.push(spawn_periodic(
                format!("la-tick-{}", cli.id),
                Duration::from_millis(da_core::la::CHECK_INTERVAL_MS),
                running.clone(),
                move || la_tick.tick(),
            ));

            let proposer = la.clone();
            background.push(
                std::thread::Builder::new()
                    .name("lattice-proposer".into())
                    .spawn(move || {
                        for values in cfg.proposals {
                            let set: BTreeSet<u32> = values.into_iter().collect();
                            proposer.propose(set);
                        }
                    })
                    .expect("failed to spawn lattice-proposer thread"),
            );
        }
    }

    tracing::info!(id = cli.id, mode = mode.as_str(), "process running, ctrl-c to stop");
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!(id = cli.id, "shutting down");
    endpoint.stop();
    running.store(false, Ordering::SeqCst);
    for handle in background {
        let _ = handle.join();
    }
    log.flush();

    Ok(())
}
