//! The wire protocol spoken between the coordinator and the participants.
//!
//! The transport is a persistent bidirectional TCP connection per
//! participant, carrying newline-delimited JSON frames. Every frame is one
//! [`Message`], tagged with a `kind` discriminator. JSON is sufficient here
//! because `serde_json` prints floats in their shortest round-trippable form,
//! so model weights survive the wire bit-exactly.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{context::ContextDescriptor, model::Model};

/// An identifier for a registered participant. Opaque to the coordinator.
pub type ParticipantId = String;

/// A model update produced by one participant for one round.
///
/// The `delta` is additive: the participant reports the difference between
/// its locally trained model and the broadcast global model. An update is
/// consumed exactly once, by the aggregation of the round it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub participant_id: ParticipantId,
    pub round_number: u64,
    pub delta: Model,
    /// The number of local samples the participant trained on. Used to
    /// weight the update during aggregation.
    pub sample_count: u64,
    /// An optional locally evaluated metric, for instance the local
    /// accuracy, averaged into the round summary.
    pub metric: Option<f64>,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Sent by a participant right after connecting to register itself.
    Hello {
        participant_id: ParticipantId,
        context: ContextDescriptor,
        sample_count: u64,
    },
    /// Sent by the coordinator to every selected participant at the start of
    /// a round.
    Broadcast { round_number: u64, model: Model },
    /// Sent by a participant once local training has completed.
    UpdateSubmit { round_number: u64, update: Update },
    /// A free-form, informational message. Carries registration
    /// acknowledgements and round summaries.
    Status { text: String },
}

/// Errors that occur while reading or writing protocol frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Writes one message as a newline-delimited JSON frame.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    // a Message never contains strings with raw newlines, so the frame is a
    // single line
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame from the connection.
///
/// Returns `Ok(None)` on a clean end of stream (the peer disconnected). A
/// malformed frame is a protocol error: the caller must treat the channel as
/// broken.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<Message>, CodecError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let message = serde_json::from_str(&line)?;
    Ok(Some(message))
}
