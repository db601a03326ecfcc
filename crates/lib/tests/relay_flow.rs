//! Integration test: start the gateway on a free port with stub Telegram and
//! Langflow servers, POST webhook updates, and assert on the calls the stubs
//! receive. Does not require a real bot token or a running Langflow.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use lib::config::Config;
use lib::dispatch::DispatchError;
use lib::gateway;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SECRET: &str = "s3cret";
const CHAT_ID: i64 = -100500;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Calls recorded by the stub servers.
#[derive(Clone, Default)]
struct StubState {
    /// (flow_id, request body) per run-flow call.
    runs: Arc<Mutex<Vec<(String, Value)>>>,
    /// sendMessage bodies.
    sends: Arc<Mutex<Vec<Value>>>,
}

async fn stub_run_flow(
    State(state): State<StubState>,
    Path(flow_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.runs.lock().expect("runs lock").push((flow_id, body));
    // Keep the call in flight briefly so a second message hits the busy gate.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Json(json!({
        "outputs": [{
            "component_name": "ChatOutput",
            "outputs": [{"results": {"message": {"text": "все добре"}}}]
        }]
    }))
}

async fn stub_send_message(
    State(state): State<StubState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.sends.lock().expect("sends lock").push(body);
    Json(json!({"ok": true, "result": {}}))
}

async fn stub_ok() -> Json<Value> {
    Json(json!({"ok": true, "result": true}))
}

async fn start_stub(port: u16, state: StubState) {
    let app = Router::new()
        .route("/api/v1/run/:flow_id", post(stub_run_flow))
        .route("/:bot/sendMessage", post(stub_send_message))
        .route("/:bot/setWebhook", post(stub_ok))
        .route("/:bot/deleteWebhook", post(stub_ok))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind stub");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
}

fn update(message_id: i64, text: &str) -> Value {
    json!({
        "update_id": message_id,
        "message": {
            "message_id": message_id,
            "chat": {"id": CHAT_ID, "type": "supergroup"},
            "from": {"id": 42, "username": "olena", "first_name": "Олена"},
            "text": text
        }
    })
}

async fn post_update(client: &reqwest::Client, url: &str, secret: &str, body: &Value) -> u16 {
    client
        .post(url)
        .header("X-Telegram-Bot-Api-Secret-Token", secret)
        .json(body)
        .send()
        .await
        .expect("post update")
        .status()
        .as_u16()
}

async fn wait_for_sends(state: &StubState, n: usize) -> Vec<Value> {
    for _ in 0..100 {
        {
            let sends = state.sends.lock().expect("sends lock");
            if sends.len() >= n {
                return sends.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let sends = state.sends.lock().expect("sends lock").clone();
    panic!("expected {} sendMessage calls within 5s, got {:?}", n, sends);
}

#[tokio::test]
async fn relay_end_to_end() {
    let stub_port = free_port();
    let stub_state = StubState::default();
    start_stub(stub_port, stub_state.clone()).await;
    std::env::set_var("TELEGRAM_API_BASE", format!("http://127.0.0.1:{}", stub_port));

    let gw_port = free_port();
    let mut config = Config::default();
    config.gateway.port = gw_port;
    config.channels.telegram.bot_token = Some("TESTTOKEN".to_string());
    config.channels.telegram.webhook_url =
        Some(format!("http://127.0.0.1:{}/telegram/webhook", gw_port));
    config.channels.telegram.webhook_secret = Some(SECRET.to_string());
    config.flow.base_url = format!("http://127.0.0.1:{}", stub_port);
    config.flow.flow_id = Some("test-flow".to_string());
    config.flow.output_component = Some("ChatOutput".to_string());

    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let client = reqwest::Client::new();
    let health_url = format!("http://127.0.0.1:{}/", gw_port);
    let webhook_url = format!("http://127.0.0.1:{}/telegram/webhook", gw_port);

    // Wait for the gateway to come up.
    let mut healthy = false;
    for _ in 0..100 {
        if let Ok(resp) = client.get(&health_url).send().await {
            if resp.status().is_success() {
                let body: Value = resp.json().await.expect("health json");
                assert_eq!(body.get("runtime").and_then(Value::as_str), Some("running"));
                healthy = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(healthy, "gateway did not become healthy within 5s");

    // Wrong webhook secret is rejected and nothing is processed.
    let status = post_update(&client, &webhook_url, "wrong", &update(1, "чат привіт")).await;
    assert_eq!(status, 403);

    // Non-message updates are acknowledged and ignored.
    let status = post_update(&client, &webhook_url, SECRET, &json!({"update_id": 2})).await;
    assert_eq!(status, 200);

    // The "id" diagnostic replies with the raw identifiers.
    let status = post_update(&client, &webhook_url, SECRET, &update(3, "id")).await;
    assert_eq!(status, 200);
    let sends = wait_for_sends(&stub_state, 1).await;
    let text = sends[0].get("text").and_then(Value::as_str).unwrap_or("");
    assert!(text.contains(&CHAT_ID.to_string()), "id reply: {}", text);
    assert!(text.contains("42"), "id reply: {}", text);

    // Trigger message: one run-flow call, one reply to the original message.
    let status = post_update(&client, &webhook_url, SECRET, &update(4, "Кріш як твій настрій")).await;
    assert_eq!(status, 200);
    let sends = wait_for_sends(&stub_state, 2).await;
    {
        let runs = stub_state.runs.lock().expect("runs lock");
        assert_eq!(runs.len(), 1);
        let (flow_id, body) = &runs[0];
        assert_eq!(flow_id, "test-flow");
        assert_eq!(body.get("input_value").and_then(Value::as_str), Some("як твій настрій"));
        assert_eq!(
            body.get("session_id").and_then(Value::as_str),
            Some(CHAT_ID.to_string().as_str())
        );
        assert_eq!(body.get("input_type").and_then(Value::as_str), Some("chat"));
        assert_eq!(body.get("output_type").and_then(Value::as_str), Some("chat"));
        assert_eq!(
            body.get("output_component").and_then(Value::as_str),
            Some("ChatOutput")
        );
    }
    let answer = &sends[1];
    assert_eq!(answer.get("text").and_then(Value::as_str), Some("все добре"));
    assert_eq!(
        answer.get("chat_id").and_then(Value::as_str),
        Some(CHAT_ID.to_string().as_str())
    );
    assert_eq!(
        answer.get("reply_to_message_id").and_then(Value::as_i64),
        Some(4)
    );

    // Non-trigger text stays silent.
    let status = post_update(&client, &webhook_url, SECRET, &update(5, "привіт усім")).await;
    assert_eq!(status, 200);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stub_state.sends.lock().expect("sends lock").len(), 2);
    assert_eq!(stub_state.runs.lock().expect("runs lock").len(), 1);

    // Two trigger messages back to back: the second is rejected with the busy
    // notice while the first is in flight, and no second run call is made for it.
    let status = post_update(&client, &webhook_url, SECRET, &update(6, "чат перше питання")).await;
    assert_eq!(status, 200);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = post_update(&client, &webhook_url, SECRET, &update(7, "чат друге питання")).await;
    assert_eq!(status, 200);

    let sends = wait_for_sends(&stub_state, 4).await;
    let texts: Vec<&str> = sends[2..]
        .iter()
        .map(|s| s.get("text").and_then(Value::as_str).unwrap_or(""))
        .collect();
    assert!(
        texts.contains(&DispatchError::Busy.user_message()),
        "expected busy notice in {:?}",
        texts
    );
    assert!(texts.contains(&"все добре"), "expected answer in {:?}", texts);
    assert_eq!(stub_state.runs.lock().expect("runs lock").len(), 2);
}
