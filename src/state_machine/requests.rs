//! The request channel between the connection tasks and the state machine.
//!
//! The per-connection receive tasks never touch round state directly: they
//! send [`StateMachineRequest`]s into this channel, and the state machine
//! processes them serially from its single control path. Each request
//! carries a oneshot response channel so the connection task can log whether
//! its update was accepted.

use derive_more::From;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::Span;

use crate::message::{ParticipantId, Update};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The update was discarded without affecting the round. The sender's
    /// registration is unaffected.
    #[error("the update was rejected: {0}")]
    UpdateRejected(&'static str),

    #[error("the request could not be processed due to an internal error: {0}")]
    InternalError(&'static str),
}

/// A request for the state machine.
#[derive(Debug, From)]
pub enum StateMachineRequest {
    /// An update submitted by a participant.
    Update(Update),
    /// A participant's channel closed (disconnect or broken channel). The
    /// registry entry is already gone by the time this arrives; the request
    /// lets an in-flight round stop waiting for the participant.
    Disconnect(ParticipantId),
}

/// A channel for the state machine to send the response to a request.
pub(in crate::state_machine) type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// A request as it travels the channel, together with its tracing span and
/// its response channel.
pub(in crate::state_machine) type TracedRequest = (StateMachineRequest, Span, ResponseSender);

/// A handle to send requests to the state machine.
#[derive(Clone, From, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<TracedRequest>);

impl RequestSender {
    /// Sends a request to the state machine and awaits its verdict.
    ///
    /// # Errors
    /// Fails if the state machine rejected the request or has already shut
    /// down.
    pub async fn request(
        &self,
        req: StateMachineRequest,
        span: Span,
    ) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.0.send((req, span, resp_tx)).map_err(|_| {
            RequestError::InternalError(
                "failed to send request to the state machine: state machine is shutting down",
            )
        })?;
        resp_rx.await.map_err(|_| {
            RequestError::InternalError("failed to receive response from the state machine")
        })?
    }
}

/// The receiver half of the request channel, owned by the state machine.
#[derive(From, Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<TracedRequest>);

impl RequestReceiver {
    /// Creates a new request channel.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RequestReceiver::from(rx), RequestSender::from(tx))
    }

    /// Closes the channel. Senders observe an error, pending requests stay
    /// readable for draining.
    pub fn close(&mut self) {
        self.0.close()
    }

    /// Receives the next request. `None` means all senders dropped.
    pub async fn recv(&mut self) -> Option<TracedRequest> {
        self.0.recv().await
    }

    /// Retrieves the next pending request without blocking.
    pub fn try_recv(&mut self) -> Option<TracedRequest> {
        self.0.try_recv().ok()
    }
}
