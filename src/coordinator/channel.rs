//! The coordinator-side send half of a participant connection.
//!
//! Each accepted connection gets a writer task that owns the socket's write
//! half and drains a bounded queue of outgoing [`Message`]s, and a
//! [`ChannelHandle`] through which the rest of the coordinator enqueues
//! messages. Sends are bounded in time: if the queue stays full for longer
//! than the configured send timeout (an unresponsive peer exerting
//! backpressure), or the writer task has died, the channel counts as broken.
//! The coordinator treats a broken channel exactly like a disconnect.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    io::AsyncWrite,
    sync::mpsc,
    time::timeout,
};
use tracing::debug;

use crate::message::{write_frame, Message};

/// Capacity of the outgoing queue per participant.
const SEND_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer did not drain the channel within the send timeout, or the
    /// connection is gone.
    #[error("channel broken")]
    Broken,
}

/// A handle for sending messages to one participant.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Message>,
    send_timeout: Duration,
}

impl ChannelHandle {
    /// Enqueues a message for the peer, waiting at most the send timeout for
    /// queue space.
    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        match timeout(self.send_timeout, self.tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            // writer task gone or peer too slow
            Ok(Err(_)) | Err(_) => Err(ChannelError::Broken),
        }
    }
}

/// Spawns the writer task for a connection and returns the send handle.
///
/// The task ends when the handle side is dropped or a write fails; a failed
/// write closes the queue, which the reader side observes as a broken
/// channel on its next send.
pub fn spawn_writer<W>(write_half: W, send_timeout: Duration) -> ChannelHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_DEPTH);
    tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(message) = rx.recv().await {
            let write = write_frame(&mut write_half, &message);
            match timeout(send_timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!("write failed, closing channel: {}", err);
                    break;
                }
                Err(_) => {
                    debug!("write timed out, closing channel");
                    break;
                }
            }
        }
    });
    ChannelHandle { tx, send_timeout }
}
