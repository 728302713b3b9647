//! Single-shot execution: retries, timeouts, response conversion, cleanup and
//! cancellation of abortable calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use botbridge::config::BridgeConfig;
use botbridge::dispatch::abort::AbortController;
use botbridge::dispatch::adapter::{BotReply, ExecuteRequest, RequestAdapter, UploadFile};
use botbridge::dispatch::default_flow::DefaultAdapter;
use botbridge::dispatch::factory::RequestFactory;
use botbridge::dispatch::{AdapterSettings, BotDescriptor, RequestModel};
use botbridge::error::BridgeError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const FLOW_REPLY: &str = r#"{"outputs":[{"outputs":[{"results":{"message":{"text":"pong"}}}]}]}"#;

/// Helper: bind a TCP listener on localhost and return (listener, port).
async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Helper: read one full HTTP request (headers plus body).
async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).to_lowercase();
            if head.contains("transfer-encoding: chunked") {
                if data.ends_with(b"0\r\n\r\n") {
                    break;
                }
                continue;
            }
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= pos + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serves `failures` HTTP 500 answers, then `body` with 200. Counts attempts
/// and forwards every raw request.
fn spawn_flaky_server(
    listener: TcpListener,
    failures: usize,
    body: &'static str,
) -> (Arc<AtomicUsize>, mpsc::UnboundedReceiver<String>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let request = read_request(&mut socket).await;
            let _ = tx.send(request);
            let response = if n < failures {
                http_response("500 Internal Server Error", "{}")
            } else {
                http_response("200 OK", body)
            };
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (attempts, rx)
}

/// Accepts connections and never answers. Counts attempts.
fn spawn_silent_server(listener: TcpListener) -> Arc<AtomicUsize> {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });
    attempts
}

fn config(port: u16, max_trials: u32) -> BridgeConfig {
    BridgeConfig {
        request_timeout: Duration::from_secs(5),
        max_trials,
        default_flows_url: format!("http://127.0.0.1:{port}"),
        local_model_url: "http://ollama.test:11434".to_string(),
        public_api_url: "http://api.test".to_string(),
        bots: vec![],
    }
}

fn default_bot() -> BotDescriptor {
    BotDescriptor {
        id: "flow-1".to_string(),
        name: "helper".to_string(),
        bot_type: "project_chat".to_string(),
        platform: "default".to_string(),
        running_mode: "default".to_string(),
        value: r#"{"agent_llm":"OpenAI","model_name":"gpt-4o"}"#.to_string(),
        ..Default::default()
    }
}

fn model(message: &str) -> RequestModel {
    RequestModel {
        message: message.to_string(),
        project_uid: Some("p1".to_string()),
        session_id: Some("s1".to_string()),
        input_type: "chat".to_string(),
        output_type: "chat".to_string(),
        ..Default::default()
    }
}

fn single_shot(message: &str) -> ExecuteRequest {
    ExecuteRequest {
        model: model(message),
        controller: None,
        use_stream: false,
    }
}

fn counted_controller() -> (Arc<AbortController>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let controller = Arc::new(AbortController::with_cleanup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    (controller, runs)
}

fn expect_text(reply: Option<BotReply>) -> String {
    match reply {
        Some(BotReply::Text(text)) => text,
        other => panic!("expected text reply, got {other:?}"),
    }
}

fn body_json(request: &str) -> serde_json::Value {
    let body = request.split("\r\n\r\n").nth(1).unwrap();
    serde_json::from_str(body).unwrap()
}

// ---------------------------------------------------------------------------
// Retry budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn succeeds_within_trial_budget() {
    let (listener, port) = mock_listener().await;
    let (attempts, _requests) = spawn_flaky_server(listener, 2, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 3)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let reply = adapter.execute(single_shot("ping")).await.unwrap();

    assert_eq!(expect_text(reply), "pong");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_trial_budget() {
    let (listener, port) = mock_listener().await;
    let (attempts, _requests) = spawn_flaky_server(listener, 10, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 1)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let reply = adapter.execute(single_shot("ping")).await.unwrap();

    assert!(reply.is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_budget_means_one_attempt() {
    let (listener, port) = mock_listener().await;
    let (attempts, _requests) = spawn_flaky_server(listener, 1, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    assert!(adapter.execute(single_shot("ping")).await.unwrap().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_reuse_the_same_request() {
    let (listener, port) = mock_listener().await;
    let (_attempts, mut requests) = spawn_flaky_server(listener, 1, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 2)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    adapter.execute(single_shot("ping")).await.unwrap();

    let first = body_json(&requests.recv().await.unwrap());
    let second = body_json(&requests.recv().await.unwrap());
    assert_eq!(first, second);
}

#[tokio::test]
async fn timeout_is_retried() {
    let (listener, port) = mock_listener().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = read_request(&mut socket).await;
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                let _ = socket
                    .write_all(http_response("200 OK", FLOW_REPLY).as_bytes())
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    let mut cfg = config(port, 1);
    cfg.request_timeout = Duration::from_secs(1);
    let factory = RequestFactory::new(&cfg).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();

    let reply = adapter.execute(single_shot("ping")).await.unwrap();
    assert_eq!(expect_text(reply), "pong");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Response conversion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_reply_field_is_no_answer_without_retry() {
    let (listener, port) = mock_listener().await;
    let (attempts, _requests) = spawn_flaky_server(listener, 0, r#"{"outputs":[]}"#);

    let factory = RequestFactory::new(&config(port, 3)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();

    assert!(adapter.execute(single_shot("ping")).await.unwrap().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn endpoint_bot_reads_configured_output_key() {
    let (listener, port) = mock_listener().await;
    let (_attempts, mut requests) = spawn_flaky_server(listener, 0, r#"{"reply":"hi","message":"no"}"#);

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let bot = BotDescriptor {
        id: "ext".to_string(),
        platform: "langflow".to_string(),
        running_mode: "endpoint".to_string(),
        url: format!("http://127.0.0.1:{port}/api/v1/run/ext"),
        credential: "engine-key".to_string(),
        ..Default::default()
    };
    let settings = AdapterSettings {
        prompt: None,
        output_key: Some("reply".to_string()),
    };
    let adapter = factory.create_request(&bot, Some(settings)).unwrap();

    let reply = adapter.execute(single_shot("hello")).await.unwrap();
    assert_eq!(expect_text(reply), "hi");

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /api/v1/run/ext?stream=false "));
    assert!(request.to_lowercase().contains("x-api-key: engine-key"));
    assert_eq!(body_json(&request)["input_value"], "hello");
}

// ---------------------------------------------------------------------------
// Request shape of the default backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_request_targets_flow_and_injects_calling_context() {
    let (listener, port) = mock_listener().await;
    let (_attempts, mut requests) = spawn_flaky_server(listener, 0, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let mut req = single_shot("ping");
    req.model.file_path = Some("uploads/a.png".to_string());
    req.model.rest_data = Some(serde_json::json!({"card_uid": "c1"}));
    adapter.execute(req).await.unwrap();

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /api/v1/run/flow-1?stream=false "));
    assert!(!request.to_lowercase().contains("authorization:"));

    let body = body_json(&request);
    assert_eq!(body["input_value"], "ping");
    assert_eq!(body["session_id"], "s1");
    let tweaks = &body["tweaks"];
    assert_eq!(tweaks["CallingContext"]["base_url"], "http://api.test");
    assert_eq!(tweaks["CallingContext"]["bot_uid"], "flow-1");
    assert_eq!(tweaks["CallingContext"]["project_uid"], "p1");
    assert_eq!(tweaks["CallingContext"]["rest_data"]["card_uid"], "c1");
    assert_eq!(tweaks["Agent"]["agent_llm"], "OpenAI");
    assert_eq!(tweaks["ChatInput"]["files"][0], "uploads/a.png");
}

#[tokio::test]
async fn blank_flow_id_declines_without_network() {
    let (listener, port) = mock_listener().await;
    let (attempts, _requests) = spawn_flaky_server(listener, 0, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 3)).unwrap();
    let mut bot = default_bot();
    bot.id = "  ".to_string();
    let adapter = factory.create_request(&bot, None).unwrap();

    let (controller, cleanups) = counted_controller();
    let req = ExecuteRequest {
        controller: Some(controller),
        ..single_shot("ping")
    };
    assert!(adapter.execute(req).await.unwrap().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn flow_definition_without_flow_id_declines_without_network() {
    let (listener, port) = mock_listener().await;
    let (attempts, _requests) = spawn_flaky_server(listener, 0, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 3)).unwrap();
    let bot = BotDescriptor {
        id: String::new(),
        name: "flow".to_string(),
        platform: "flow_engine".to_string(),
        running_mode: "flow_definition".to_string(),
        value: r#"{"data":{"nodes":[],"edges":[]}}"#.to_string(),
        ..Default::default()
    };
    let adapter = factory.create_request(&bot, None).unwrap();

    assert!(adapter.execute(single_shot("ping")).await.unwrap().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn flow_definition_posts_flow_to_run_url() {
    let (listener, port) = mock_listener().await;
    let (_attempts, mut requests) = spawn_flaky_server(listener, 0, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let bot = BotDescriptor {
        id: "flow-7".to_string(),
        name: "flow".to_string(),
        platform: "flow_engine".to_string(),
        running_mode: "flow_definition".to_string(),
        value: r#"{"data":{"nodes":[],"edges":[]}}"#.to_string(),
        ..Default::default()
    };
    let adapter = factory.create_request(&bot, None).unwrap();

    let reply = adapter.execute(single_shot("ping")).await.unwrap();
    assert_eq!(expect_text(reply), "pong");

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /api/v1/run/flow-7?stream=false "));
    assert!(body_json(&request)["flow"]["data"]["nodes"].is_array());
}

#[tokio::test]
async fn unsupported_platform_raises_and_still_cleans_up() {
    let factory = RequestFactory::new(&config(1, 0)).unwrap();
    let mut bot = default_bot();
    bot.platform = "zapier".to_string();
    let adapter = RequestAdapter::Default(DefaultAdapter::new(
        bot,
        "http://127.0.0.1:1".to_string(),
        AdapterSettings::default(),
        factory.context().clone(),
    ));

    let (controller, cleanups) = counted_controller();
    let req = ExecuteRequest {
        controller: Some(controller),
        ..single_shot("ping")
    };
    let err = adapter.execute(req).await.unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedPlatform(_)));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Cleanup and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_runs_once_after_success() {
    let (listener, port) = mock_listener().await;
    let _ = spawn_flaky_server(listener, 1, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 2)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let (controller, cleanups) = counted_controller();

    let req = ExecuteRequest {
        controller: Some(controller.clone()),
        ..single_shot("ping")
    };
    let reply = adapter.execute(req).await.unwrap();
    assert_eq!(expect_text(reply), "pong");
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    // A late abort after completion does not run cleanup again.
    controller.abort();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanup_runs_once_after_final_failure() {
    let (listener, port) = mock_listener().await;
    let _ = spawn_flaky_server(listener, 10, FLOW_REPLY);

    let factory = RequestFactory::new(&config(port, 2)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let (controller, cleanups) = counted_controller();

    let req = ExecuteRequest {
        controller: Some(controller),
        ..single_shot("ping")
    };
    assert!(adapter.execute(req).await.unwrap().is_none());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn abort_stops_in_flight_call_without_retry() {
    let (listener, port) = mock_listener().await;
    let attempts = spawn_silent_server(listener);

    let factory = RequestFactory::new(&config(port, 5)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let (controller, cleanups) = counted_controller();

    let aborter = controller.clone();
    let cancel_handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        aborter.abort();
    });

    let start = Instant::now();
    let req = ExecuteRequest {
        controller: Some(controller),
        ..single_shot("ping")
    };
    let reply = adapter.execute(req).await.unwrap();

    assert!(reply.is_none());
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    cancel_handle.await.unwrap();
}

#[tokio::test]
async fn aborted_before_start_makes_no_attempt() {
    let (listener, port) = mock_listener().await;
    let attempts = spawn_silent_server(listener);

    let factory = RequestFactory::new(&config(port, 5)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let (controller, cleanups) = counted_controller();
    controller.abort();

    let req = ExecuteRequest {
        controller: Some(controller),
        ..single_shot("ping")
    };
    assert!(adapter.execute(req).await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Upload and availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_upload_returns_file_path() {
    let (listener, port) = mock_listener().await;
    let (_attempts, mut requests) =
        spawn_flaky_server(listener, 0, r#"{"file_path":"flow-1/notes.txt"}"#);

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let file = UploadFile {
        file_name: "notes.txt".to_string(),
        content_type: Some("text/plain".to_string()),
        bytes: b"remember the milk".to_vec(),
    };

    assert_eq!(adapter.upload(&file).await.as_deref(), Some("flow-1/notes.txt"));

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /api/v1/files/upload/flow-1 "));
    assert!(request.contains("remember the milk"));
}

#[tokio::test]
async fn upload_failure_yields_none() {
    let (listener, port) = mock_listener().await;
    let _ = spawn_flaky_server(listener, 10, "{}");

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    let file = UploadFile {
        file_name: "a.bin".to_string(),
        content_type: None,
        bytes: vec![1, 2, 3],
    };
    assert!(adapter.upload(&file).await.is_none());
}

#[tokio::test]
async fn default_availability_checks_health() {
    let (listener, port) = mock_listener().await;
    let (_attempts, mut requests) = spawn_flaky_server(listener, 0, "{}");

    let factory = RequestFactory::new(&config(port, 0)).unwrap();
    let adapter = factory.create_request(&default_bot(), None).unwrap();
    assert!(adapter.is_available().await);
    assert!(requests.recv().await.unwrap().starts_with("GET /health "));
}
