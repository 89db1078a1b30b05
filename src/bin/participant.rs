use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    net::SocketAddr,
    process,
};

use clap::Parser;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, FmtSubscriber};

use fedfleet::{
    context::ContextDescriptor,
    model::Model,
    participant::{Participant, TargetTrainer},
};

#[derive(Debug, Parser)]
#[command(name = "participant", about = "A federated learning participant client.")]
struct Opt {
    /// The unique participant id
    #[arg(short, long)]
    id: String,

    /// The address of the coordinator
    #[arg(short, long, default_value = "127.0.0.1:8081")]
    coordinator: SocketAddr,

    /// The region this participant reports in its context
    #[arg(long, default_value = "local")]
    region: String,

    /// A capability tag, may be given multiple times
    #[arg(long = "capability")]
    capabilities: Vec<String>,

    /// The number of local training samples to report
    #[arg(long, default_value_t = 100)]
    sample_count: u64,

    /// The number of weights of the model
    #[arg(long, default_value_t = 4)]
    model_length: usize,

    /// The step size of the demo trainer
    #[arg(long, default_value_t = 0.5)]
    rate: f64,

    /// A comma-separated list of logging directives
    #[arg(long, default_value = "info")]
    log: String,
}

/// Derives a per-participant training target so that different clients pull
/// the global model in different directions.
fn target_model(id: &str, length: usize) -> Model {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let offset = (hasher.finish() % 1000) as f64 / 100.0;
    (0..length).map(|i| offset + i as f64).collect()
}

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&opt.log))
        .with_ansi(true)
        .init();

    let context = ContextDescriptor::new(opt.region, opt.capabilities);
    let trainer = TargetTrainer::new(
        target_model(&opt.id, opt.model_length),
        opt.rate,
        opt.sample_count,
    );
    let participant = Participant::new(opt.id, context, opt.sample_count, trainer);

    if let Err(err) = participant.run(opt.coordinator).await {
        error!("participant failed: {}", err);
        process::exit(1);
    }
}
