//! The participant client.
//!
//! A participant connects to the coordinator, announces itself and then
//! reacts to whatever the coordinator sends: each model broadcast triggers a
//! local training step whose delta is submitted back. Rounds the participant
//! is not selected for simply pass it by.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::{io::BufReader, net::TcpStream};
use tracing::{debug, info};

use crate::{
    context::ContextDescriptor,
    message::{read_frame, write_frame, CodecError, Message, ParticipantId, Update},
    model::Model,
};

#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("wire protocol failure: {0}")]
    Codec(#[from] CodecError),
}

/// The result of one local training step.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// The delta to submit, relative to the received global model.
    pub delta: Model,
    /// The number of samples the step was trained on.
    pub sample_count: u64,
    /// An optional quality metric, for instance the local loss.
    pub metric: Option<f64>,
}

/// A local training procedure.
pub trait Trainer {
    /// Runs one training step on the given global model.
    fn train(&mut self, round_number: u64, model: &Model) -> TrainingOutcome;
}

/// A participant and its training procedure.
pub struct Participant<T> {
    id: ParticipantId,
    context: ContextDescriptor,
    sample_count: u64,
    trainer: T,
}

impl<T> Participant<T>
where
    T: Trainer,
{
    pub fn new(id: ParticipantId, context: ContextDescriptor, sample_count: u64, trainer: T) -> Self {
        Self {
            id,
            context,
            sample_count,
            trainer,
        }
    }

    /// Connects to the coordinator and participates until the coordinator
    /// closes the connection.
    pub async fn run(mut self, coordinator: SocketAddr) -> Result<(), ParticipantError> {
        let stream = TcpStream::connect(coordinator).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        write_frame(
            &mut writer,
            &Message::Hello {
                participant_id: self.id.clone(),
                context: self.context.clone(),
                sample_count: self.sample_count,
            },
        )
        .await?;

        loop {
            match read_frame(&mut reader).await? {
                Some(Message::Broadcast {
                    round_number,
                    model,
                }) => {
                    info!("received the global model for round {}", round_number);
                    let outcome = self.trainer.train(round_number, &model);
                    let update = Update {
                        participant_id: self.id.clone(),
                        round_number,
                        delta: outcome.delta,
                        sample_count: outcome.sample_count,
                        metric: outcome.metric,
                    };
                    write_frame(
                        &mut writer,
                        &Message::UpdateSubmit {
                            round_number,
                            update,
                        },
                    )
                    .await?;
                    info!("submitted the local update for round {}", round_number);
                }
                Some(Message::Status { text }) => {
                    info!("coordinator: {}", text);
                }
                Some(other) => {
                    debug!("ignoring unexpected {:?} frame", other);
                }
                None => {
                    info!("coordinator closed the connection");
                    return Ok(());
                }
            }
        }
    }
}

/// A demo trainer that pulls the model toward a fixed target, as a stand-in
/// for real local training. The reported metric is the mean squared distance
/// to the target before the step.
#[derive(Debug, Clone)]
pub struct TargetTrainer {
    target: Model,
    rate: f64,
    sample_count: u64,
}

impl TargetTrainer {
    pub fn new(target: Model, rate: f64, sample_count: u64) -> Self {
        Self {
            target,
            rate,
            sample_count,
        }
    }
}

impl Trainer for TargetTrainer {
    fn train(&mut self, _round_number: u64, model: &Model) -> TrainingOutcome {
        let delta: Model = self
            .target
            .iter()
            .zip(model.iter())
            .map(|(target, weight)| self.rate * (target - weight))
            .collect();
        let distance = self
            .target
            .iter()
            .zip(model.iter())
            .map(|(target, weight)| (target - weight).powi(2))
            .sum::<f64>()
            / self.target.len().max(1) as f64;
        TrainingOutcome {
            delta,
            sample_count: self.sample_count,
            metric: Some(distance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_trainer_moves_toward_the_target() {
        let mut trainer = TargetTrainer::new(Model::from(vec![1.0, -1.0]), 0.5, 10);
        let outcome = trainer.train(1, &Model::zeros(2));
        assert_eq!(outcome.delta, Model::from(vec![0.5, -0.5]));
        assert_eq!(outcome.sample_count, 10);
        assert_eq!(outcome.metric, Some(1.0));
    }

    #[test]
    fn test_target_trainer_converges() {
        let mut trainer = TargetTrainer::new(Model::from(vec![2.0]), 0.5, 10);
        let mut model = Model::zeros(1);
        for round in 1..=10 {
            let outcome = trainer.train(round, &model);
            model.add_scaled(&outcome.delta, 1.0);
        }
        assert!((model[0] - 2.0).abs() < 1e-2);
    }
}
