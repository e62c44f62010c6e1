//! End-to-end test of the MIDI stream: stub input device → listener thread → hub →
//! WebSocket clients.

use midi_ws_gw::api::{build_router, ApiState};
use midi_ws_gw::config::{CorsOrigins, FadeDefaults};
use midi_ws_gw::listener::{run_pump, spawn_listeners, INBOUND_CHANNEL_CAPACITY};
use midi_ws_gw::ports::stub::StubPorts;
use midi_ws_gw::{BroadcastHub, MidiMessage};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(state: Arc<ApiState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state, &CorsOrigins::Any);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn next_json(client: &mut Client) -> Value {
    let message = timeout(WAIT, client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error");
    serde_json::from_str(&message.into_text().unwrap()).unwrap()
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_midi_input_reaches_every_client() {
    let stub = StubPorts::new()
        .with_inputs(["Keys"])
        .with_outputs(["Synth"]);
    let feed = stub.input_feed("Keys");
    let ports = Arc::new(stub);

    let hub = Arc::new(BroadcastHub::default());
    let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    tokio::spawn(run_pump(hub.clone(), rx));
    let listeners = spawn_listeners(ports.clone(), tx);
    assert_eq!(listeners.len(), 1);

    let addr = serve(Arc::new(ApiState {
        ports,
        hub: hub.clone(),
        fade_defaults: FadeDefaults::default(),
    }))
    .await;
    let url = format!("ws://{}/ws/midi", addr);

    let (mut first, _) = connect_async(&url).await.unwrap();
    let (mut second, _) = connect_async(&url).await.unwrap();

    for client in [&mut first, &mut second] {
        let greeting = next_json(client).await;
        assert_eq!(greeting["input_devices"], serde_json::json!(["Keys"]));
        assert_eq!(greeting["output_devices"], serde_json::json!(["Synth"]));
    }
    assert_eq!(hub.len(), 2);

    feed.send(MidiMessage::control_change(4, 7, 99)).unwrap();

    for client in [&mut first, &mut second] {
        let frame = next_json(client).await;
        assert_eq!(frame["device"], "Keys");

        let data: Value = serde_json::from_str(frame["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["type"], "control_change");
        assert_eq!(data["channel"], 4);
        assert_eq!(data["control"], 7);
        assert_eq!(data["value"], 99);
        assert_eq!(data["time"], 0);
    }

    // A closed client leaves the hub; the other keeps receiving
    first.close(None).await.unwrap();
    wait_until(|| hub.len() == 1).await;

    feed.send(MidiMessage::Stop).unwrap();
    let frame = next_json(&mut second).await;
    let data: Value = serde_json::from_str(frame["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, serde_json::json!({"type": "stop", "time": 0}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_client_leaves_hub() {
    let hub = Arc::new(BroadcastHub::default());
    let addr = serve(Arc::new(ApiState {
        ports: Arc::new(StubPorts::new()),
        hub: hub.clone(),
        fade_defaults: FadeDefaults::default(),
    }))
    .await;

    let (mut client, _) = connect_async(format!("ws://{}/ws/midi", addr))
        .await
        .unwrap();
    let greeting = next_json(&mut client).await;
    assert_eq!(greeting["input_devices"], serde_json::json!([]));
    wait_until(|| hub.len() == 1).await;

    hub.publish(&MidiMessage::Start, "Pads");
    let frame = next_json(&mut client).await;
    assert_eq!(frame["device"], "Pads");

    drop(client);
    wait_until(|| hub.is_empty()).await;
}
