// IR tag node daemon: one emulated device on a UDP multicast "radio" channel,
// driven from a fixed-period tick and controlled through stdin.

mod config;
mod console;
mod radio;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tag_core::Node;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("tag-linux {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument {other:?}"),
        }
    }

    let cfg = config::load(config_path.as_deref());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let (udp, socket) = radio::bind(cfg.radio_port)
        .with_context(|| format!("binding radio channel on port {}", cfg.radio_port))?;
    let mut node = Node::new(cfg.node_config(), udp);
    tracing::info!(address = %node.address(), role = ?cfg.role, port = cfg.radio_port, "node up");

    let producer = node.producer();
    tokio::spawn(async move {
        if let Err(e) = radio::recv_loop(socket, producer).await {
            tracing::error!(error = %e, "radio receive loop stopped");
        }
    });

    let epoch = Instant::now();
    let now = || epoch.elapsed().as_millis() as u32;
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in node.tick(now()) {
                    console::report(&event);
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match console::parse(&line) {
                    Ok(Some(cmd)) => {
                        if let Err(e) = console::execute(&mut node, now(), cmd) {
                            println!("error: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("error: {e}\n{}", console::HELP),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
            res = &mut shutdown => {
                res?;
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
