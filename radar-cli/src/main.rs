//! txradar command line
//!
//! Watch transaction announcements on the Bitcoin network, broadcast a raw
//! transaction and watch it propagate, or track how far given transactions
//! have spread.
//!
//! # Usage
//!
//! ```bash
//! txradar --network testnet sentinel
//! txradar broadcast 0200000001...
//! txradar --config txradar.toml radar <txid> <txid>
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use radar_core::{Hash, Transaction};
use radar_network::Network;
use radar_relay::{Broadcaster, LogConfig, RelayConfig, Sentinel, Severity, TxRadar};

#[derive(Parser, Debug)]
#[command(name = "txradar")]
#[command(about = "Bitcoin transaction announcement monitor and broadcaster")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "TXRADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Network to join, overriding the configuration file
    #[arg(long, global = true)]
    network: Option<NetworkArg>,

    /// Peer address to dial instead of DNS seeds (repeatable)
    #[arg(long = "peer", global = true)]
    peers: Vec<String>,

    /// Worker threads
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Log level for console output
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Keep the log files from the configuration instead of logging to the console
    #[arg(long, global = true)]
    log_files: bool,

    /// JSON console logs
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every transaction hash peers announce
    Sentinel {
        /// Peers to keep connected
        #[arg(long)]
        hosts: Option<usize>,
    },

    /// Broadcast a raw transaction and watch it come back from the network
    Broadcast {
        /// Consensus-encoded transaction, hex
        tx: String,

        /// Seconds to keep watching after the broadcast
        #[arg(long, default_value_t = 30)]
        linger: u64,
    },

    /// Report how far the given transactions have propagated
    Radar {
        /// Transaction ids, explorer byte order
        #[arg(required = true)]
        txids: Vec<String>,

        /// Peers to listen on
        #[arg(long)]
        hosts: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NetworkArg {
    Bitcoin,
    Testnet,
    Signet,
    Regtest,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Bitcoin => Network::Bitcoin,
            NetworkArg::Testnet => Network::Testnet,
            NetworkArg::Signet => Network::Signet,
            NetworkArg::Regtest => Network::Regtest,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn severity(self) -> Severity {
        match self {
            LogLevel::Debug => Severity::Debug,
            LogLevel::Info => Severity::Info,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Error => Severity::Error,
        }
    }

    fn filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// What the monitor threads report back to `main`
enum Event {
    Started(Option<String>),
    Announced(Hash),
    Progress(Hash, f64),
    Shutdown,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level, cli.json_logs)?;

    let config = load_config(&cli)?;
    let (events, receiver) = mpsc::channel();
    watch_ctrl_c(events.clone());

    match cli.command {
        Command::Sentinel { hosts } => run_sentinel(config, hosts, events, receiver),
        Command::Broadcast { tx, linger } => {
            run_broadcast(config, &tx, Duration::from_secs(linger), events, receiver)
        }
        Command::Radar { txids, hosts } => run_radar(config, &txids, hosts, events, receiver),
    }
}

fn init_tracing(level: LogLevel, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.filter()))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    installed.context("Failed to install tracing subscriber")
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = RelayConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(network) = cli.network {
        config.pool = config.pool.with_network(network.into());
    }
    if !cli.peers.is_empty() {
        config.pool = config.pool.with_peers(cli.peers.clone());
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if !cli.log_files {
        config.log = LogConfig::console().with_level(cli.log_level.severity());
    }

    config.validate()?;
    info!(
        network = %config.pool.network,
        threads = config.threads,
        "Configuration loaded"
    );
    Ok(config)
}

/// Forward Ctrl-C as [`Event::Shutdown`]
fn watch_ctrl_c(events: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Ctrl-C handler unavailable: {}", e);
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            let _ = events.send(Event::Shutdown);
        }
    });
}

fn started_callback(
    events: &mpsc::Sender<Event>,
) -> impl Fn(Option<String>) -> Result<()> + Send + Sync + 'static {
    let events = events.clone();
    move |failure| {
        events.send(Event::Started(failure))?;
        Ok(())
    }
}

fn run_sentinel(
    config: RelayConfig,
    hosts: Option<usize>,
    events: mpsc::Sender<Event>,
    receiver: mpsc::Receiver<Event>,
) -> Result<()> {
    let sentinel = Sentinel::from_config(&config)?;
    let on_started = started_callback(&events);
    sentinel.start(
        config.threads,
        hosts.unwrap_or(config.monitor_hosts),
        move |hash| {
            events.send(Event::Announced(hash))?;
            Ok(())
        },
        on_started,
    )?;

    for event in receiver {
        match event {
            Event::Started(None) => info!("Sentinel running, press Ctrl-C to stop"),
            Event::Started(Some(reason)) => warn!("Sentinel failed to start: {}", reason),
            Event::Announced(hash) => println!("{}", hash),
            Event::Progress(..) => {}
            Event::Shutdown => break,
        }
    }

    sentinel.stop()?;
    Ok(())
}

fn run_broadcast(
    config: RelayConfig,
    raw_hex: &str,
    linger: Duration,
    events: mpsc::Sender<Event>,
    receiver: mpsc::Receiver<Event>,
) -> Result<()> {
    let raw = hex::decode(raw_hex.trim()).context("Transaction is not valid hex")?;
    let txid = Transaction::parse(&raw)
        .context("Not a valid transaction")?
        .hash();

    let broadcaster = Broadcaster::from_config(&config)?;
    let on_started = started_callback(&events);
    broadcaster.start(
        config.threads,
        config.broadcast_hosts,
        config.monitor_hosts,
        move |hash| {
            events.send(Event::Announced(hash))?;
            Ok(())
        },
        on_started,
    )?;

    let mut deadline: Option<Instant> = None;
    let mut sightings = 0usize;
    loop {
        let event = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(remaining) {
                    Ok(event) => event,
                    Err(_) => break,
                }
            }
            None => match receiver.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            Event::Started(None) => {
                if !broadcaster.broadcast(&raw) {
                    broadcaster.stop()?;
                    bail!("Broadcaster refused the transaction");
                }
                info!(tx = %txid, "Transaction broadcast, watching for announcements");
                deadline = Some(Instant::now() + linger);
            }
            Event::Started(Some(reason)) => {
                broadcaster.stop()?;
                bail!("Broadcaster failed to start: {}", reason);
            }
            Event::Announced(hash) if hash == txid => {
                sightings += 1;
                info!(tx = %txid, sightings, "Transaction announced by a peer");
            }
            Event::Announced(_) | Event::Progress(..) => {}
            Event::Shutdown => break,
        }
    }

    broadcaster.stop()?;
    println!("{} announced {} time(s)", txid, sightings);
    Ok(())
}

/// Parse explorer-order txids, dropping repeats
fn parse_txids(txids: &[String]) -> Result<Vec<Hash>> {
    let mut seen = HashSet::new();
    let mut hashes = Vec::with_capacity(txids.len());
    for txid in txids {
        let hash = Hash::from_display_hex(txid)
            .with_context(|| format!("Invalid transaction id: {}", txid))?;
        if seen.insert(hash) {
            hashes.push(hash);
        }
    }
    Ok(hashes)
}

fn run_radar(
    config: RelayConfig,
    txids: &[String],
    hosts: Option<usize>,
    events: mpsc::Sender<Event>,
    receiver: mpsc::Receiver<Event>,
) -> Result<()> {
    let sentinel = Sentinel::from_config(&config)?;
    let radar = TxRadar::for_sentinel(&sentinel, hosts.unwrap_or(config.monitor_hosts));

    let hashes = parse_txids(txids)?;
    let mut pending = hashes.len();
    for hash in hashes {
        let events = events.clone();
        radar.monitor(hash, move |ratio| {
            events.send(Event::Progress(hash, ratio))?;
            Ok(())
        });
    }

    radar.start(&sentinel, config.threads, started_callback(&events))?;
    drop(events);

    let mut complete = HashSet::new();
    for event in receiver {
        match event {
            Event::Started(None) => info!(tracked = radar.tracked_count(), "Radar running"),
            Event::Started(Some(reason)) => warn!("Radar failed to start: {}", reason),
            Event::Progress(hash, ratio) => {
                println!("{} {:.1}%", hash, ratio * 100.0);
                if ratio >= 1.0 && complete.insert(hash) {
                    pending -= 1;
                    if pending == 0 {
                        break;
                    }
                }
            }
            Event::Announced(_) => {}
            Event::Shutdown => break,
        }
    }

    sentinel.stop()?;
    Ok(())
}
