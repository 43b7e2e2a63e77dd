use broker_client::testing::ScriptedGateway;
use broker_client::{BrokerClient, ClientConfig, ClientError, TickRecorder};
use std::sync::Arc;
use std::time::Duration;
use trading::{Instrument, Tick, TickAttributes, TickType};

fn ready_client(gateway: &Arc<ScriptedGateway>) -> Arc<BrokerClient> {
    let config = ClientConfig::default()
        .with_connect_policy(3, Duration::from_millis(1))
        .with_pump_interval(Duration::from_millis(1));
    let client = Arc::new(BrokerClient::connect(gateway.clone(), config).unwrap());
    assert!(client.wait_until_ready(Duration::from_secs(5)));
    client
}

#[test]
fn test_recorder_writes_one_line_per_tick() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::new());
    let client = ready_client(&gateway);

    let mut recorder = TickRecorder::start(client.clone(), "aapl", dir.path()).unwrap();
    assert!(recorder
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("AAPL.tickdat"));

    let id = client
        .tick_registry()
        .subscription_for(&Instrument::new("AAPL"))
        .unwrap();
    gateway.push_tick(id, Tick::new(TickType::AllLast, 100, 150.5, 10, "ISLAND"));
    gateway.push_tick(
        id,
        Tick::new(TickType::AllLast, 101, 150.75, 20, "NYSE").with_attributes(TickAttributes {
            pre_open: true,
            ..TickAttributes::default()
        }),
    );

    // Client shutdown drains the mailbox, so both ticks are on disk after it.
    let seen = gateway.process_calls();
    while gateway.process_calls() < seen + 2 {
        std::thread::sleep(Duration::from_millis(1));
    }
    client.shutdown();
    recorder.stop().unwrap();

    let contents = std::fs::read_to_string(recorder.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("AllLast,100,"));
    assert!(lines[0].ends_with(",150.5,10,0,0,0,0,0,0,ISLAND"));
    assert!(lines[1].ends_with(",150.75,20,0,0,1,0,0,0,NYSE"));
}

#[test]
fn test_recorder_rejects_tickdat_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::new());
    let client = ready_client(&gateway);

    let result = TickRecorder::start(client, "Jan  2AAPL.tickdat", dir.path());
    assert!(matches!(result, Err(ClientError::InvalidSymbol(_))));
    assert!(gateway.subscriptions().is_empty());
}

#[test]
fn test_dropping_recorder_cancels_subscription() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::new());
    let client = ready_client(&gateway);

    let recorder = TickRecorder::start(client.clone(), "MSFT", dir.path()).unwrap();
    assert_eq!(gateway.subscriptions().len(), 1);
    drop(recorder);
    assert_eq!(gateway.unsubscriptions().len(), 1);
    assert!(client.tick_registry().is_empty());
}
