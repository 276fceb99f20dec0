use crate::cli::{CommonArgs, Commands};
use crate::consumer::ChannelSink;
use crate::ebpf::loader::AyaLoader;
use crate::event::{Output, Severity};
use crate::gadget::{FsSlower, Gadget, TcpConnect, TcpTracer};
use crate::tracer::Tracer;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::Ordering;
use tokio::signal;
use tracing::{error, info, warn};

/// Outputs buffered between the consumer thread and stdout
const EVENT_CHANNEL_CAPACITY: usize = 4096;

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Fsslower {
            common,
            filesystem,
            min_latency,
        } => {
            let mut config = common.load_config()?;
            if let Some(fs) = filesystem {
                config.backend = Some(fs);
            }
            if let Some(ms) = min_latency {
                config.min_latency_ms = ms;
            }
            run_gadget(FsSlower, &common, config).await
        }
        Commands::Tcptracer { common } => {
            let config = common.load_config()?;
            run_gadget(TcpTracer, &common, config).await
        }
        Commands::Tcpconnect { common } => {
            let config = common.load_config()?;
            run_gadget(TcpConnect, &common, config).await
        }
    }
}

/// Start the gadget and print its events as JSON lines until Ctrl+C
async fn run_gadget<G>(gadget: G, common: &CommonArgs, config: crate::Config) -> Result<()>
where
    G: Gadget,
    G::Event: Serialize,
{
    let name = gadget.name();
    let loader = match &common.probes_dir {
        Some(dir) => AyaLoader::new(dir.clone()),
        None => AyaLoader::with_default_path(),
    };

    let (sink, mut rx) = ChannelSink::<G::Event>::new(EVENT_CHANNEL_CAPACITY);
    let dropped = sink.dropped();

    let mut tracer = Tracer::new(gadget, loader, config, sink);
    tracer
        .start()
        .with_context(|| format!("Failed to start {}", name))?;

    info!("{} running. Press Ctrl+C to exit.", name);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            output = rx.recv() => match output {
                Some(Output::Event(event)) => {
                    println!("{}", serde_json::to_string(&event)?);
                }
                Some(Output::Notice(notice)) => match notice.severity {
                    Severity::Error => error!("{}", notice.message),
                    Severity::Warning => warn!("{}", notice.message),
                },
                None => {
                    // consumer exited on a fatal read error
                    warn!("{} stopped consuming events", name);
                    break;
                }
            }
        }
    }

    let stats = tracer.stats();
    tracer
        .stop()
        .with_context(|| format!("Failed to stop {}", name))?;

    info!(
        "{} stopped: {} events, {} lost samples, {} decode errors, {} dropped",
        name,
        stats.events,
        stats.lost_samples,
        stats.decode_errors,
        dropped.load(Ordering::Relaxed)
    );
    Ok(())
}
