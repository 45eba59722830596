//! nfqlb: netfilter-queue load balancer
//!
//! This is the main entry point for the balancer daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./nfqlb
//!
//! # Run with custom configuration
//! sudo ./nfqlb -c /path/to/config.json
//!
//! # Run with environment overrides
//! NFQLB_LOG_LEVEL=debug NFQLB_QUEUES=2,3 sudo ./nfqlb
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use nfqlb::config::{load_config_with_env, Config};
use nfqlb::dispatch::LoadBalancer;

/// How often the main task checks whether a worker gave up
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/nfqlb/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("nfqlb v{}", nfqlb::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"nfqlb v{}

Netfilter-queue load balancer with Maglev consistent hashing.

USAGE:
    nfqlb [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/nfqlb/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    NFQLB_LOG_LEVEL         Override log level (trace, debug, info, warn, error)
    NFQLB_QUEUES            Override queue numbers (comma separated)
    NFQLB_FAILURE_POLICY    Override failure policy (fail_open, fail_closed)
    NFQLB_UDP_ENCAP_PORT    Override UDP port carrying encapsulated SCTP

REQUIREMENTS:
    - Linux kernel with nfnetlink_queue
    - CAP_NET_ADMIN capability (or root)
    - iptables NFQUEUE rules and fwmark policy routing configured

EXAMPLE:
    # Queue new traffic to the balancer, route by the mark it sets
    iptables -t mangle -A PREROUTING -d 10.0.0.0/32 -j NFQUEUE --queue-num 2
    ip rule add fwmark 101 table 101
    ip route add default via 192.168.1.1 table 101

    # Run the balancer
    sudo nfqlb -c /etc/nfqlb/config.json
"#,
        nfqlb::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Start one worker thread per configured queue
#[cfg(target_os = "linux")]
fn spawn_workers(
    config: &Config,
    balancer: &Arc<LoadBalancer>,
    stop: &Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>> {
    use nfqlb::dispatch::nfqueue::QueueWorker;

    config
        .queue
        .queues
        .iter()
        .map(|&queue| {
            QueueWorker::new(queue, Arc::clone(balancer), Arc::clone(stop))
                .spawn()
                .with_context(|| format!("Failed to start worker for queue {queue}"))
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn spawn_workers(
    _config: &Config,
    _balancer: &Arc<LoadBalancer>,
    _stop: &Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>> {
    Err(nfqlb::QueueError::Unsupported.into())
}

/// Purge expired fragment entries and log statistics periodically
async fn run_maintenance(balancer: Arc<LoadBalancer>, interval: Duration, log_stats: bool) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let purged = balancer.fragments().purge_expired();
        if !log_stats {
            continue;
        }

        let stats = balancer.stats();
        let frags = balancer.fragments().stats();
        info!(
            packets = stats.packets,
            marked = stats.marked,
            dropped = stats.dropped,
            errors = stats.errors,
            own_mark_bypass = stats.own_mark_bypass,
            no_table = stats.no_table,
            fragment_fallbacks = stats.fragment_fallbacks,
            "dispatch statistics"
        );
        info!(
            entries = frags.entries,
            hits = frags.hits,
            misses = frags.misses,
            expired = frags.expired,
            evicted = frags.evicted,
            purged,
            "fragment statistics"
        );
    }
}

/// Resolve once the stop flag is set, e.g. by a failing worker
async fn wait_for_stop(stop: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(WORKER_POLL_INTERVAL);
    while !stop.load(Ordering::Relaxed) {
        ticker.tick().await;
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        nfqlb::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("nfqlb v{}", nfqlb::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let balancer = Arc::new(
        LoadBalancer::from_config(&config).context("Failed to build backend table")?,
    );
    if config.balancer.backends.is_empty() {
        warn!(
            policy = %config.queue.failure_policy,
            "No backends configured, applying failure policy to all packets"
        );
    }

    let stop = Arc::new(AtomicBool::new(false));
    let workers = spawn_workers(&config, &balancer, &stop)?;

    let maintenance = tokio::spawn(run_maintenance(
        Arc::clone(&balancer),
        config.stats_interval().unwrap_or_else(|| config.fragments.ttl()),
        config.stats_interval().is_some(),
    ));

    info!(
        "nfqlb ready on queues {:?} ({} backends, policy {}) in {:.2}ms",
        config.queue.queues,
        config.balancer.backends.len(),
        config.queue.failure_policy,
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let worker_failed = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            false
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            false
        }
        () = wait_for_stop(Arc::clone(&stop)) => {
            warn!("A queue worker stopped, initiating shutdown...");
            true
        }
    };

    info!("Shutting down...");
    stop.store(true, Ordering::Relaxed);
    maintenance.abort();

    // Workers blocked in recv notice the flag on their next packet; only
    // reap the ones that already returned.
    let mut pending = 0;
    for handle in workers {
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("Queue worker panicked");
            }
        } else {
            pending += 1;
        }
    }
    if pending > 0 {
        info!("{} queue workers still waiting for a packet", pending);
    }

    let stats = balancer.stats();
    info!(
        "Final stats: {} packets, {} marked, {} dropped, {} errors",
        stats.packets, stats.marked, stats.dropped, stats.errors
    );
    info!("Shutdown complete");

    if worker_failed {
        anyhow::bail!("Queue worker failed");
    }
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
