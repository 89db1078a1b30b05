//! The coordinator front end.
//!
//! This module owns everything between the TCP listener and the state
//! machine: the participant registry, the per-connection transport channels,
//! cohort selection and update aggregation. The connection tasks spawned
//! here never touch round state directly; they register participants and
//! forward their frames to the state machine over the request channel.

pub mod aggregator;
pub mod channel;
pub mod registry;
pub mod selector;

use std::{io, net::SocketAddr, time::Duration};

use tokio::{
    io::BufReader,
    net::{tcp::OwnedReadHalf, TcpListener, TcpStream},
};
use tracing::{debug, info, warn, Instrument};

use crate::{
    coordinator::{
        channel::spawn_writer,
        registry::{ParticipantEntry, Registry},
    },
    message::{read_frame, Message, ParticipantId},
    state_machine::{
        events::{StatusEmitter, StatusEvent},
        requests::{RequestSender, StateMachineRequest},
    },
};

/// The TCP front end of the coordinator.
pub struct Coordinator {
    listener: TcpListener,
    registry: Registry,
    requests: RequestSender,
    status: StatusEmitter,
    send_timeout: Duration,
}

impl Coordinator {
    /// Binds the coordinator to the given address.
    pub async fn bind(
        bind_address: SocketAddr,
        registry: Registry,
        requests: RequestSender,
        status: StatusEmitter,
        send_timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            registry,
            requests,
            status,
            send_timeout,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!("accepted connection from {}", peer_addr);
            let connection = Connection {
                registry: self.registry.clone(),
                requests: self.requests.clone(),
                status: self.status.clone(),
                send_timeout: self.send_timeout,
            };
            tokio::spawn(
                async move { connection.handle(stream).await }
                    .instrument(tracing::error_span!("connection", peer = %peer_addr)),
            );
        }
    }
}

/// One accepted connection, before and after its participant registers.
struct Connection {
    registry: Registry,
    requests: RequestSender,
    status: StatusEmitter,
    send_timeout: Duration,
}

impl Connection {
    async fn handle(self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // the first frame must announce who this is
        let (id, context, sample_count) = match read_frame(&mut reader).await {
            Ok(Some(Message::Hello {
                participant_id,
                context,
                sample_count,
            })) => (participant_id, context, sample_count),
            Ok(Some(_)) => {
                warn!("peer sent a non-hello first frame, closing");
                return;
            }
            Ok(None) => return,
            Err(err) => {
                warn!("could not read the hello frame: {}", err);
                return;
            }
        };

        let channel = spawn_writer(write_half, self.send_timeout);
        let entry = ParticipantEntry::new(channel.clone(), context, sample_count);
        if let Err(err) = self.registry.register(id.clone(), entry) {
            warn!("registration rejected: {}", err);
            let _ = channel
                .send(Message::Status {
                    text: format!("registration rejected: {}", err),
                })
                .await;
            return;
        }

        info!("registered participant {:?}", id);
        self.status.emit(StatusEvent::Registered {
            participant_id: id.clone(),
        });
        let _ = channel
            .send(Message::Status {
                text: format!("registered as {}", id),
            })
            .await;

        self.read_loop(&mut reader, &id).await;

        // reached on EOF, a read error or a malformed frame. The entry may
        // already be gone if a broadcast send failed in the meantime.
        if self.registry.unregister(&id) {
            info!("unregistered participant {:?}", id);
            self.status.emit(StatusEvent::Unregistered {
                participant_id: id.clone(),
            });
        }
        let _ = self
            .requests
            .request(
                StateMachineRequest::Disconnect(id),
                tracing::Span::current(),
            )
            .await;
    }

    async fn read_loop(&self, reader: &mut BufReader<OwnedReadHalf>, id: &ParticipantId) {
        loop {
            match read_frame(reader).await {
                Ok(Some(Message::UpdateSubmit {
                    round_number,
                    update,
                })) => {
                    if &update.participant_id != id {
                        warn!(
                            "peer {:?} submitted an update as {:?}, dropping it",
                            id, update.participant_id,
                        );
                        continue;
                    }
                    if update.round_number != round_number {
                        warn!("update frame with inconsistent round numbers, dropping it");
                        continue;
                    }
                    let request = StateMachineRequest::Update(update);
                    if let Err(err) =
                        self.requests.request(request, tracing::Span::current()).await
                    {
                        warn!("update from {:?} not accepted: {}", id, err);
                    }
                }
                Ok(Some(other)) => {
                    debug!("ignoring unexpected {:?} frame from {:?}", other, id);
                }
                Ok(None) => {
                    debug!("peer {:?} closed the connection", id);
                    return;
                }
                Err(err) => {
                    warn!("read error on connection of {:?}: {}", id, err);
                    return;
                }
            }
        }
    }
}
