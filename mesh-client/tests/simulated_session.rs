//! Full client session against the simulated controller.

use mesh_core::LinkStatus;
use mesh_types::{ChannelKey, NodeId, RelayStatus, SequenceStatus, SequenceStep};
use relaymesh_client::{
    ClientConfig, ClientError, PersistStore, PersistedState, RelayClient, StateStore,
    TransportError,
};
use std::time::Duration;

fn simulated(failure_rate: f64) -> RelayClient {
    let mut config = ClientConfig::default();
    config.simulation.enabled = true;
    config.simulation.failure_rate = failure_rate;
    config.simulation.seed = Some(7);
    RelayClient::from_config(
        config,
        None,
        StateStore::from_persisted(PersistedState::default()),
    )
}

fn relay_status(client: &RelayClient, key: &ChannelKey) -> RelayStatus {
    client.store().relay(key).unwrap().status
}

#[tokio::test(start_paused = true)]
async fn simulated_session_end_to_end() {
    let client = simulated(0.0);
    client.connect().await.unwrap();
    assert_eq!(client.status(), LinkStatus::Connected);

    // Synthetic mesh and its channels arrive through the store
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.store().nodes().len(), 3);
    assert_eq!(client.store().relays_of(&NodeId::new("node_2")).len(), 4);
    assert_eq!(client.store().relays_of(&NodeId::local()).len(), 6);
    assert!(client.health().connectivity > 0);

    // Countdown fire on a remote channel
    let key = ChannelKey::new("node_2", 1u32);
    client.fire(&key, 1.0).unwrap();
    assert_eq!(relay_status(&client, &key), RelayStatus::Timer);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(relay_status(&client, &key), RelayStatus::Fired);
    assert!(matches!(
        client.fire(&key, 0.0),
        Err(ClientError::Rejected(_))
    ));

    client.prime(&key).await.unwrap();
    assert_eq!(relay_status(&client, &key), RelayStatus::Ready);

    // A sequence across nodes
    let seq = client
        .sequencer()
        .create(
            "sweep",
            vec![
                SequenceStep::new("node_1", 1u32, 0.5),
                SequenceStep::new("node_3", 2u32, 0.5),
                SequenceStep::new("local", 4u32, 0.0),
            ],
        )
        .unwrap();
    client.run_sequence(&seq.id).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let done = client.store().sequence(&seq.id).unwrap();
    assert_eq!(done.status, SequenceStatus::Completed);
    assert!(done.last_run.is_some());
    for key in [
        ChannelKey::new("node_1", 1u32),
        ChannelKey::new("node_3", 2u32),
        ChannelKey::local(4u32),
    ] {
        assert_eq!(relay_status(&client, &key), RelayStatus::Fired);
    }

    // State survives a restart
    let dir = tempfile::TempDir::new().unwrap();
    let persist = PersistStore::new(dir.path());
    client.save(&persist).await.unwrap();
    assert!(persist.has_recoverable_state().await.unwrap());

    let restored = StateStore::from_persisted(persist.get_persisted().await.unwrap());
    assert_eq!(
        restored.relay(&ChannelKey::local(4u32)).unwrap().status,
        RelayStatus::Fired
    );
    assert_eq!(
        restored.sequence(&seq.id).unwrap().status,
        SequenceStatus::Completed
    );

    client.close().await.unwrap();
    assert_eq!(client.status(), LinkStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn faulty_controller_leaves_store_untouched() {
    let client = simulated(1.0);
    client.connect().await.unwrap();
    let key = ChannelKey::local(2u32);
    let before = client.store().relay(&key).unwrap();

    let started = tokio::time::Instant::now();
    let err = client.relays().fire_now(&key, 0.0).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::SimulatedDevice(_))
    ));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(relay_status(&client, &key), RelayStatus::Ready);
    assert_eq!(client.store().relay(&key).unwrap(), before);

    let err = client.scan_network().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::SimulatedDevice(_))
    ));
}
