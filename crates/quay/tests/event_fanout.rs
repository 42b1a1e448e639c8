// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Event fan-out integration tests
//!
//! Validates subscription filtering, wildcard subscription, best-effort
//! broadcast, and protocol discovery through the control protocol.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quay::{
    control_protocol, ActionRegistry, Call, Client, ClientConfig, EventSpec, LoopbackTransport,
    Message, Param, ParamDef, ParamLayout, ProtocolSpec, RegistryBuilder, Server, ServerConfig,
    SUBSCRIBE_ALL,
};

const SENSORS: u8 = 21;
const MOTORS: u8 = 22;

fn sensors_protocol() -> ProtocolSpec {
    ProtocolSpec::new("test.sensors", SENSORS).event(EventSpec::new(
        "reading",
        vec![ParamDef::new("value", ParamLayout::Value { width: 4 })],
    ))
}

fn motors_protocol() -> ProtocolSpec {
    ProtocolSpec::new("test.motors", MOTORS).event(EventSpec::new(
        "stall",
        vec![ParamDef::new("motor", ParamLayout::Value { width: 1 })],
    ))
}

fn fanout_server() -> Arc<Server> {
    let registry = RegistryBuilder::new()
        .protocol(sensors_protocol().resolve().expect("valid protocol"))
        .expect("register sensors")
        .protocol(motors_protocol().resolve().expect("valid protocol"))
        .expect("register motors")
        .build();
    Arc::new(Server::new(Arc::new(registry), ServerConfig::default()))
}

/// What one connected client observed
#[derive(Default)]
struct Observed {
    readings: Mutex<Vec<u32>>,
    protocols: Mutex<Vec<(String, u8)>>,
}

fn event_registry(observed: Arc<Observed>) -> Arc<ActionRegistry> {
    let readings = observed.clone();
    let protocols = observed;
    Arc::new(
        RegistryBuilder::new()
            .protocol(sensors_protocol().resolve().expect("valid protocol"))
            .expect("register sensors")
            .protocol(control_protocol())
            .expect("register control")
            .on_notify(SENSORS, "reading", move |call: Call| {
                if let Ok(value) = call.params[0].as_u32() {
                    readings.readings.lock().push(value);
                }
            })
            .expect("attach reading")
            .on_notify(0, "protocol_info", move |call: Call| {
                let namespace = call.params[0]
                    .as_string()
                    .ok()
                    .flatten()
                    .unwrap_or("")
                    .to_owned();
                if let Ok(id) = call.params[1].as_u8() {
                    protocols.protocols.lock().push((namespace, id));
                }
            })
            .expect("attach protocol_info")
            .build(),
    )
}

struct Connection {
    client: Arc<Client>,
    observed: Arc<Observed>,
}

/// Attach one client to the server and pump both directions
fn connect(server: &Arc<Server>, peer: u64) -> Connection {
    let to_server = Arc::new(LoopbackTransport::new());
    let to_client = Arc::new(LoopbackTransport::new());
    server.add_peer(peer, to_client.clone());

    let observed = Arc::new(Observed::default());
    let client = Arc::new(Client::new(
        to_server.clone(),
        event_registry(observed.clone()),
        ClientConfig {
            default_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        },
    ));

    let pump_server = server.clone();
    let pump_client = client.clone();
    tokio::spawn(async move {
        loop {
            let mut idle = true;
            while let Some(frame) = to_server.take() {
                idle = false;
                let _ = pump_server.handle_frame(peer, &frame);
            }
            while let Some(frame) = to_client.take() {
                idle = false;
                let _ = pump_client.handle_frame(&frame);
            }
            if idle {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    });

    Connection { client, observed }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_subscribers_and_skips_the_rest() {
    let server = fanout_server();
    let listener = connect(&server, 1);
    let bystander = connect(&server, 2);

    listener.client.subscribe(SENSORS).expect("subscribe");
    settle().await;

    let delivered = server
        .broadcast(Message::event(SENSORS, 0, vec![Param::u32(17)]))
        .expect("broadcast");
    assert_eq!(delivered, 1);
    settle().await;

    assert_eq!(*listener.observed.readings.lock(), vec![17]);
    assert!(bystander.observed.readings.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_subscription_covers_every_protocol() {
    let server = fanout_server();
    let listener = connect(&server, 1);
    listener.client.subscribe(SUBSCRIBE_ALL).expect("subscribe all");
    settle().await;

    let sensors = server
        .broadcast(Message::event(SENSORS, 0, vec![Param::u32(3)]))
        .expect("broadcast sensors");
    let motors = server
        .broadcast(Message::event(MOTORS, 0, vec![Param::u8(1)]))
        .expect("broadcast motors");
    assert_eq!((sensors, motors), (1, 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_stops_further_deliveries() {
    let server = fanout_server();
    let listener = connect(&server, 1);

    listener.client.subscribe(SENSORS).expect("subscribe");
    settle().await;
    server
        .broadcast(Message::event(SENSORS, 0, vec![Param::u32(1)]))
        .expect("broadcast");
    settle().await;

    listener.client.unsubscribe(SENSORS).expect("unsubscribe");
    settle().await;
    server
        .broadcast(Message::event(SENSORS, 0, vec![Param::u32(2)]))
        .expect("broadcast");
    settle().await;

    assert_eq!(*listener.observed.readings.lock(), vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_protocols_describes_the_server() {
    let server = fanout_server();
    let connection = connect(&server, 1);

    connection.client.list_protocols().expect("list");
    settle().await;

    let protocols = connection.observed.protocols.lock().clone();
    assert_eq!(
        protocols,
        vec![
            ("test.sensors".to_owned(), SENSORS),
            ("test.motors".to_owned(), MOTORS),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unicast_send_ignores_subscriptions() {
    let server = fanout_server();
    let listener = connect(&server, 1);

    // Never subscribed, still addressable directly.
    server
        .send_to(1, Message::event(SENSORS, 0, vec![Param::u32(9)]))
        .expect("unicast");
    settle().await;
    assert_eq!(*listener.observed.readings.lock(), vec![9]);
}
