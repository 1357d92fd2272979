//! Connection lifecycle of the manager against mock ports and testers.

use std::time::Duration;

use glp2::frame::{ACK, DATA_MARKER, NAK, frame, frame_data_string};
use glp2::settings::keys;
use glp2::steps::{PeMode, PeTest, StepHeader};
use glp2::{
    Error, Glp2Event, Glp2Manager, Glp2ManagerBuilder, LifecycleState, StaticSettings, TestProgram,
};
use glp2_core::{PortDescriptor, Transport};
use glp2_test_harness::{MockConnector, MockPortLister, MockTransport};
use tokio::sync::broadcast::{self, error::RecvError};

const PORT: &str = "/dev/ttyUSB3";

fn request(text: &str) -> Vec<u8> {
    frame_data_string(1, text)
}

fn reply(text: &str) -> Vec<u8> {
    frame(1, DATA_MARKER, text.as_bytes())
}

fn settings() -> StaticSettings {
    StaticSettings::new()
        .with(keys::ENABLED, true)
        .with(keys::COM_PATTERN, "GLP2")
        .with(keys::CANCEL_DELAY, 100)
}

fn ports() -> MockPortLister {
    MockPortLister::new(vec![
        PortDescriptor::new("/dev/ttyS0").with_field("type", "pci"),
        PortDescriptor::new(PORT)
            .with_field("manufacturer", "SCHLEICH")
            .with_field("product", "GLP2 Safety Tester"),
    ])
}

/// A tester that accepts the reset sequence every time and has nothing
/// to report.
fn healthy_tester() -> MockTransport {
    let mock = MockTransport::new();
    for text in ["TA", "DR", "DP", "SP_1_1_2_2_3_333_4_2", "TS", "VIS_1", "VIS_0"] {
        mock.rule(&request(text), &[ACK]);
    }
    mock.rule(&request("IW"), &[NAK]);
    mock.rule(&request("OPT"), &reply("OPT PE ISO FCT "));
    mock
}

fn build(settings: StaticSettings, lister: MockPortLister, connector: &MockConnector) -> Glp2Manager {
    Glp2ManagerBuilder::new(settings)
        .port_lister(lister)
        .connector(connector.clone())
        .build()
}

async fn ready_manager(tester: &MockTransport) -> (Glp2Manager, MockConnector) {
    let connector = MockConnector::new();
    connector.push(tester.clone());
    let manager = build(settings(), ports(), &connector);
    manager.start().await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Ready);
    (manager, connector)
}

async fn wait_for(events: &mut broadcast::Receiver<Glp2Event>, wanted: Glp2Event) {
    let seen = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if event == wanted => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    assert!(seen.is_ok(), "never saw {wanted:?}");
}

fn sent_count(mock: &MockTransport, text: &str) -> usize {
    let wanted = request(text);
    mock.sent_data().iter().filter(|s| **s == wanted).count()
}

#[tokio::test(start_paused = true)]
async fn start_without_matching_port_is_disconnected() {
    let connector = MockConnector::new();
    let lister = MockPortLister::new(vec![PortDescriptor::new("/dev/ttyS0")]);
    let manager = build(settings(), lister, &connector);

    let result = manager.start().await;
    assert!(matches!(result, Err(Error::PortNotFound(pattern)) if pattern == "GLP2"));
    assert_eq!(manager.state(), LifecycleState::Disconnected);
    assert!(connector.opened_ports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_or_unlicensed_stays_stopped() {
    let connector = MockConnector::new();

    let disabled = settings().with(keys::ENABLED, false);
    let manager = build(disabled, ports(), &connector);
    assert!(matches!(manager.start().await, Err(Error::Disabled)));
    assert_eq!(manager.state(), LifecycleState::Stopped);

    let manager = build(settings().licensed(false), ports(), &connector);
    assert!(matches!(manager.start().await, Err(Error::Disabled)));
    assert_eq!(manager.state(), LifecycleState::Stopped);

    assert!(connector.opened_ports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn port_listing_failure_stops() {
    let connector = MockConnector::new();
    let manager = build(settings(), MockPortLister::failing("permission denied"), &connector);
    let mut events = manager.subscribe();

    assert!(matches!(manager.start().await, Err(Error::PortListing(_))));
    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert!(matches!(events.try_recv(), Ok(Glp2Event::StateChanged(LifecycleState::Connecting))));
    assert!(matches!(events.try_recv(), Ok(Glp2Event::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn start_resets_the_tester_to_ready() {
    let tester = healthy_tester();
    let connector = MockConnector::new();
    connector.push(tester.clone());
    let manager = build(settings(), ports(), &connector);
    let mut events = manager.subscribe();

    manager.start().await.unwrap();

    assert!(manager.is_ready());
    assert_eq!(connector.opened_ports(), vec![PORT.to_string()]);
    assert_eq!(
        tester.sent_data()[..6],
        [
            request("TA"),
            request("DR"),
            request("DP"),
            request("SP_1_1_2_2_3_333_4_2"),
            request("IW"),
            request("OPT"),
        ]
    );

    let mut states = Vec::new();
    let mut ready = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Glp2Event::StateChanged(state) => states.push(state),
            Glp2Event::Ready => ready = true,
            _ => {}
        }
    }
    assert!(ready);
    assert_eq!(
        states,
        vec![
            LifecycleState::Connecting,
            LifecycleState::Resetting,
            LifecycleState::Ready
        ]
    );

    // Starting again while ready is a no-op.
    manager.start().await.unwrap();
    assert_eq!(connector.opened_ports().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn operations_need_ready() {
    let connector = MockConnector::new();
    let manager = build(settings(), ports(), &connector);
    let step = PeTest::new(StepHeader::new(1), PeMode::Ac, 10.0, 0.1).unwrap();
    let program = TestProgram::new("P", vec![step.into()]).unwrap();

    assert!(matches!(manager.start_test().await, Err(Error::NoConnection)));
    assert!(matches!(manager.cancel_test().await, Err(Error::NoConnection)));
    assert!(matches!(manager.get_actual_values().await, Err(Error::NoConnection)));
    assert!(matches!(manager.ack_visual_test(true).await, Err(Error::NoConnection)));
    assert!(matches!(
        manager.set_test_program(&program).await,
        Err(Error::NoConnection)
    ));
    assert!(matches!(
        manager.reset(Duration::ZERO).await,
        Err(Error::NoConnection)
    ));
}

#[tokio::test(start_paused = true)]
async fn stuck_tester_fails_the_reset() {
    let tester = MockTransport::new();
    for text in ["TA", "DR", "DP", "SP_1_1_2_2_3_333_4_2"] {
        tester.rule(&request(text), &[ACK]);
    }
    tester.rule(&request("IW"), &reply("IST F_5 "));

    let connector = MockConnector::new();
    connector.push(tester.clone());
    let manager = build(settings(), ports(), &connector);

    assert!(matches!(manager.start().await, Err(Error::StuckTester(5))));
    assert_eq!(manager.state(), LifecycleState::Disconnected);
    assert_eq!(sent_count(&tester, "IW"), 11);
    assert!(!tester.is_connected());
}

#[tokio::test(start_paused = true)]
async fn lost_link_disconnects_and_health_check_reconnects() {
    let first = healthy_tester();
    let (manager, connector) = ready_manager(&first).await;
    let mut events = manager.subscribe();

    first.unplug();
    wait_for(
        &mut events,
        Glp2Event::StateChanged(LifecycleState::Disconnected),
    )
    .await;
    assert!(!manager.is_ready());

    let second = healthy_tester();
    connector.push(second.clone());
    wait_for(&mut events, Glp2Event::StateChanged(LifecycleState::Ready)).await;
    assert_eq!(connector.opened_ports(), vec![PORT.to_string(), PORT.to_string()]);
    assert_eq!(sent_count(&second, "TA"), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_stays_stopped() {
    let tester = healthy_tester();
    let (manager, connector) = ready_manager(&tester).await;

    manager.stop().await;
    assert_eq!(manager.state(), LifecycleState::Stopped);

    // Well past several health check periods.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert_eq!(connector.opened_ports().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn panel_start_button_is_reported() {
    let tester = healthy_tester();
    let (manager, _connector) = ready_manager(&tester).await;
    let mut events = manager.subscribe();

    tester.expect(&request("IW"), &reply("IST F_3 "));
    wait_for(&mut events, Glp2Event::StartRequested).await;
    assert!(manager.is_ready());
}

#[tokio::test(start_paused = true)]
async fn running_test_pauses_the_monitor() {
    let tester = healthy_tester();
    let (manager, _connector) = ready_manager(&tester).await;

    manager.start_test().await.unwrap();
    assert!(manager.is_test_in_progress());

    let polls = sent_count(&tester, "IW");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sent_count(&tester, "IW"), polls);

    tester.expect(&request("IW"), &reply("IST 001 PE 10.0 9.8 IO 500 A END "));
    let values = manager.get_actual_values().await.unwrap();
    assert!(values.is_some());
    assert!(!manager.is_test_in_progress());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(sent_count(&tester, "IW") > polls + 1);
}

#[tokio::test(start_paused = true)]
async fn reset_while_ready() {
    let tester = healthy_tester();
    let (manager, _connector) = ready_manager(&tester).await;

    manager.reset(Duration::from_millis(100)).await.unwrap();
    assert!(manager.is_ready());
    assert_eq!(sent_count(&tester, "TA"), 2);
    assert_eq!(sent_count(&tester, "DP"), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_results_drain_within_the_limit() {
    let tester = healthy_tester();
    for _ in 0..10 {
        tester.expect(&request("IW"), &reply("IST 001 PE 10.0 9.8 IO 500 A F_5 END "));
    }

    let (manager, _connector) = ready_manager(&tester).await;
    assert!(manager.is_ready());
    // Ten stale reports, then the NAK that ends the drain.
    assert_eq!(sent_count(&tester, "IW"), 11);
    assert_eq!(tester.remaining_expectations(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_timeout_disconnects() {
    let tester = healthy_tester();
    tester.expect_silence(&request("DP"));

    let connector = MockConnector::new();
    connector.push(tester.clone());
    let manager = build(settings(), ports(), &connector);
    let mut events = manager.subscribe();

    assert!(matches!(manager.start().await, Err(Error::ResponseTimeout)));
    assert_eq!(manager.state(), LifecycleState::Disconnected);
    assert!(!tester.is_connected());
    assert_eq!(sent_count(&tester, "DP"), 1);
    assert_eq!(sent_count(&tester, "SP_1_1_2_2_3_333_4_2"), 0);
    assert_eq!(sent_count(&tester, "IW"), 0);

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Glp2Event::Error(_)) {
            saw_error = true;
        }
        assert_ne!(event, Glp2Event::Ready);
    }
    assert!(saw_error);
}

#[tokio::test(start_paused = true)]
async fn idle_monitor_backs_off_after_timeouts() {
    let tester = healthy_tester();
    let (manager, _connector) = ready_manager(&tester).await;
    let mut events = manager.subscribe();

    // More silent polls than the tester gets warnings for, then a press of
    // the panel start button.
    let silent = 7;
    for _ in 0..silent {
        tester.expect_silence(&request("IW"));
    }
    tester.expect(&request("IW"), &reply("IST F_3 "));
    let polls = sent_count(&tester, "IW");
    let started = tokio::time::Instant::now();

    wait_for(&mut events, Glp2Event::StartRequested).await;

    // Each silent poll costs the response timeout plus the retry delay.
    assert!(started.elapsed() >= Duration::from_secs(2 * silent as u64));
    assert_eq!(sent_count(&tester, "IW"), polls + silent + 1);
    assert!(manager.is_ready());
}
