use std::{path::PathBuf, process, time::Duration};

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use fedfleet::{
    coordinator::{registry::Registry, Coordinator},
    settings::Settings,
    state_machine::StateMachineInitializer,
};

#[derive(Debug, Parser)]
#[command(name = "coordinator", about = "The federated learning round coordinator.")]
struct Opt {
    /// Path of the configuration file
    #[arg(short, long)]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    let settings = Settings::new(&opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api,
        round,
        transport,
        selection,
        privacy,
        model,
        log,
    } = settings;
    FmtSubscriber::builder()
        .with_env_filter(log.filter)
        .with_ansi(true)
        .init();

    let send_timeout = Duration::from_secs(transport.send_timeout);
    let registry = Registry::new();
    let (state_machine, handle) =
        StateMachineInitializer::new(round, transport, selection, privacy, model, registry.clone())
            .init();

    let coordinator = match Coordinator::bind(
        api.bind_address,
        registry,
        handle.requests.clone(),
        handle.status.clone(),
        send_timeout,
    )
    .await
    {
        Ok(coordinator) => coordinator,
        Err(err) => {
            error!("failed to bind {}: {}", api.bind_address, err);
            process::exit(1);
        }
    };

    let mut status = handle.events.status_listener();
    tokio::spawn(async move {
        while let Some(event) = status.next().await {
            info!(round = event.round_id, "{:?}", event.event);
        }
    });

    tokio::select! {
        biased;
        _ = signal::ctrl_c() => {
            info!("shutting down: received SIGINT");
        }
        _ = state_machine.run() => {
            info!("shutting down: all rounds have run");
        }
        result = coordinator.run() => {
            if let Err(err) = result {
                error!("shutting down: listener failed: {}", err);
            }
        }
    }
}
