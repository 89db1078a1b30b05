//! End-to-end runs against a coordinator bound to a loopback socket.

use std::time::Duration;

use tokio::{io::BufReader, net::TcpStream};

use fedfleet::{
    context::ContextDescriptor,
    coordinator::{registry::Registry, Coordinator},
    message::{read_frame, write_frame, Message},
    model::Model,
    participant::{Participant, TargetTrainer},
    settings::{
        ModelSettings,
        PrivacySettings,
        RoundSettings,
        RoundSettingsTime,
        SelectionSettings,
        TransportSettings,
    },
    state_machine::{events::ModelUpdate, StateMachineHandle, StateMachine, StateMachineInitializer},
};

fn settings(participants: usize, min_updates: usize, count: u64) -> (RoundSettings, TransportSettings, SelectionSettings, PrivacySettings, ModelSettings) {
    (
        RoundSettings {
            count,
            participants,
            min_updates,
            time: RoundSettingsTime {
                registration: 10,
                collection: 10,
            },
        },
        TransportSettings { send_timeout: 5 },
        SelectionSettings {
            recency_weight: 0.5,
            similarity_weight: 0.5,
            target_context: None,
        },
        PrivacySettings {
            epsilon: 1.0,
            sensitivity: 0.0,
            seed: Some(42),
        },
        ModelSettings { length: 2 },
    )
}

async fn start_coordinator(
    participants: usize,
    min_updates: usize,
    count: u64,
) -> (std::net::SocketAddr, StateMachine, StateMachineHandle) {
    let (round, transport, selection, privacy, model) = settings(participants, min_updates, count);
    let registry = Registry::new();
    let (machine, handle) = StateMachineInitializer::new(
        round,
        transport,
        selection,
        privacy,
        model,
        registry.clone(),
    )
    .init();
    let coordinator = Coordinator::bind(
        "127.0.0.1:0".parse().unwrap(),
        registry,
        handle.requests.clone(),
        handle.status.clone(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let addr = coordinator.local_addr().unwrap();
    tokio::spawn(coordinator.run());
    (addr, machine, handle)
}

#[tokio::test]
async fn test_two_participants_run_two_rounds() {
    let (addr, machine, handle) = start_coordinator(2, 2, 2).await;
    let models = handle.events.model_listener();
    let machine_task = tokio::spawn(machine.run());

    // anna pulls toward [1, 1], bert toward [3, 3], equal sample counts
    for (id, target) in [("anna", 1.0), ("bert", 3.0)] {
        let trainer = TargetTrainer::new(Model::from(vec![target, target]), 0.5, 10);
        let participant =
            Participant::new(id.to_string(), ContextDescriptor::default(), 10, trainer);
        tokio::spawn(participant.run(addr));
    }

    assert!(machine_task.await.unwrap().is_none());

    // round 1 averages the deltas toward [1, 1]; round 2 adds half of the
    // remaining pull of bert
    let latest = models.get_latest();
    assert_eq!(latest.round_id, 2);
    assert_eq!(
        latest.event,
        ModelUpdate::New(Model::from(vec![1.5, 1.5]).into())
    );
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let (addr, machine, _handle) = start_coordinator(2, 1, 1).await;
    tokio::spawn(machine.run());

    let hello = Message::Hello {
        participant_id: "anna".to_string(),
        context: ContextDescriptor::default(),
        sample_count: 10,
    };

    let mut first = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut first, &hello).await.unwrap();

    let second = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = second.into_split();
    let mut reader = BufReader::new(read_half);
    write_frame(&mut write_half, &hello).await.unwrap();

    // the first frame of the second connection reports the rejection
    loop {
        match read_frame(&mut reader).await.unwrap() {
            Some(Message::Status { text }) => {
                if text.contains("rejected") {
                    break;
                }
            }
            Some(_) => continue,
            None => panic!("connection closed without a rejection status"),
        }
    }
}
