use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const PILOT_SECRET: &str = "e2e-test-secret";
const SESSION_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_pilot_auth_and_data_ownership() {
    let (addr, _shutdown) = spawn_pilot().await;
    let client = reqwest::Client::new();
    wait_for_health(&client, addr).await;

    let base = format!("http://{}", addr);

    // Register the first user.
    let resp = client
        .post(format!("{}/auth/register", base))
        .json(&serde_json::json!({
            "username": "alice",
            "email": "a@example.com",
            "full_name": "Alice A",
            "password": "hunter2",
        }))
        .send()
        .await
        .expect("register should succeed");
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["email"], "a@example.com");

    // Registering the same email again is a validation error.
    let resp = client
        .post(format!("{}/auth/register", base))
        .json(&serde_json::json!({
            "username": "alice2",
            "email": "a@example.com",
            "password": "hunter2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], true);
    assert_eq!(body["message"], "Email already registered");

    // A malformed email is rejected before touching the store.
    let resp = client
        .post(format!("{}/auth/register", base))
        .json(&serde_json::json!({
            "username": "bob",
            "email": "not-an-email",
            "password": "pw",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    // Wrong password is a 401.
    let resp = client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({"email": "a@example.com", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Correct credentials return a token whose subject is the email.
    let resp = client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({"email": "a@example.com", "password": "hunter2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let alice_token = body["access_token"].as_str().unwrap().to_string();
    assert_eq!(body["token_type"], "bearer");
    assert!(body["expires_at"].as_i64().unwrap() > 0);
    assert_eq!(body["user"]["email"], "a@example.com");

    let claims = datapilot_auth::decode_token(PILOT_SECRET, &alice_token).unwrap();
    assert_eq!(claims.sub, "a@example.com");

    // Identity endpoints agree.
    let resp = client
        .get(format!("{}/auth/me", base))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["username"], "alice");

    // Requests without a token are rejected.
    let resp = client.get(format!("{}/data", base)).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    // Create a data item.
    let resp = client
        .post(format!("{}/data", base))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({
            "title": "shopping",
            "content": "milk, bread",
            "data_type": "note",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let data_id = body["id"].as_i64().unwrap();
    assert_eq!(body["data_type"], "note");

    // Disallowed data types are rejected.
    let resp = client
        .post(format!("{}/data", base))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({
            "title": "x",
            "content": "y",
            "data_type": "sql",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // A second user cannot see Alice's item even with its exact id.
    let resp = client
        .post(format!("{}/auth/register", base))
        .json(&serde_json::json!({
            "username": "bob",
            "email": "b@example.com",
            "password": "hunter2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({"email": "b@example.com", "password": "hunter2"}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    let bob_token = body["access_token"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("{}/data/{}", base, data_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(format!("{}/data/{}", base, data_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Update, profile change, refresh, delete.
    let resp = client
        .put(format!("{}/data/{}", base, data_id))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({
            "title": "shopping v2",
            "content": "milk",
            "data_type": "task",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["title"], "shopping v2");

    let resp = client
        .put(format!("{}/users/me", base))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({"full_name": "Alice Ayy"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["full_name"], "Alice Ayy");

    let resp = client
        .post(format!("{}/auth/refresh", base))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let refreshed = body["access_token"].as_str().unwrap();
    assert_eq!(
        datapilot_auth::decode_token(PILOT_SECRET, refreshed)
            .unwrap()
            .sub,
        "a@example.com"
    );

    let resp = client
        .delete(format!("{}/data/{}", base, data_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/data/{}", base, data_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_dashboard_pipeline_flow() {
    let (addr, _shutdown) = spawn_dashboard(HashMap::new()).await;
    let client = reqwest::Client::new();
    wait_for_health(&client, addr).await;

    let base = format!("http://{}", addr);

    let resp = client.get(format!("{}/", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("x-content-type-options")
            .and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "online");

    // First state read creates the session; the second returns the same
    // record.
    let state_url = format!("{}/api/state?session_id={}", base, SESSION_ID);
    let first: serde_json::Value = client
        .get(&state_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["current_step"], 0);
    assert_eq!(first["steps"].as_array().unwrap().len(), 0);

    let second: serde_json::Value = client
        .get(&state_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["created_at"], first["created_at"]);

    // Upload requires a bearer token.
    let resp = client
        .post(format!("{}/api/upload?session_id={}", base, SESSION_ID))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Upload with a dev token mints a file id and records the first step.
    let resp = client
        .post(format!("{}/api/upload?session_id={}", base, SESSION_ID))
        .bearer_auth("dev-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let file_id = body["file_id"].as_str().unwrap().to_string();
    assert!(file_id.starts_with("file_"));
    assert_eq!(body["status"], "success");

    // A malformed session id is rejected before any state changes.
    let resp = client
        .post(format!("{}/api/upload?session_id=short", base))
        .bearer_auth("dev-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], true);

    // Preview validates both ids and returns the canned sample.
    let resp = client
        .get(format!(
            "{}/api/preview?file_id={}&session_id={}",
            base, file_id, SESSION_ID
        ))
        .bearer_auth("dev-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["rows"], 1000);

    // Walk the remaining stages in order.
    for stage in [
        "clean",
        "analyze",
        "visualize",
        "model",
        "report",
        "convert",
        "schema-validate",
    ] {
        let resp = client
            .post(format!("{}/api/{}?session_id={}", base, stage, SESSION_ID))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "stage {} should succeed", stage);
    }

    // One step per call, counter tracking the latest stage ordinal.
    let state: serde_json::Value = client
        .get(&state_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["steps"].as_array().unwrap().len(), 9);
    assert_eq!(state["current_step"], 9);
    assert_eq!(state["current_file_id"], file_id.as_str());
    assert_eq!(state["steps"][0]["step"], "upload");
    assert_eq!(state["steps"][8]["step"], "schema");
    assert_eq!(state["steps"][8]["status"], "completed");

    // Frontend security log sink.
    let resp = client
        .post(format!("{}/api/security/log", base))
        .bearer_auth("dev-token")
        .json(&serde_json::json!({
            "event": "CSP_VIOLATION",
            "details": {"blocked_uri": "https://evil.example"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "logged");

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(health["active_sessions"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_dashboard_upload_rate_limit() {
    let (addr, _shutdown) = spawn_dashboard(HashMap::from([
        ("DASH_UPLOAD_MAX_REQUESTS".to_string(), "2".to_string()),
        ("DASH_UPLOAD_WINDOW_SECS".to_string(), "60".to_string()),
    ]))
    .await;
    let client = reqwest::Client::new();
    wait_for_health(&client, addr).await;

    let url = format!("http://{}/api/upload?session_id={}", addr, SESSION_ID);

    for _ in 0..2 {
        let resp = client
            .post(&url)
            .bearer_auth("dev-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client
        .post(&url)
        .bearer_auth("dev-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["retry_after"], 60);

    // The general API category is unaffected by the exhausted upload budget.
    let resp = client
        .get(format!(
            "http://{}/api/state?session_id={}",
            addr, SESSION_ID
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

async fn spawn_pilot() -> (SocketAddr, oneshot::Sender<()>) {
    let config = datapilot_api::config::PilotConfig::from_kv(&HashMap::from([
        ("PILOT_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        ("PILOT_DB_URL".to_string(), "sqlite::memory:".to_string()),
        ("PILOT_SECRET_KEY".to_string(), PILOT_SECRET.to_string()),
    ]))
    .expect("pilot config should be valid");

    let app = datapilot_api::http::router(config)
        .await
        .expect("pilot router should init");

    spawn_server(app).await
}

async fn spawn_dashboard(extra: HashMap<String, String>) -> (SocketAddr, oneshot::Sender<()>) {
    let mut kv = HashMap::from([
        ("DASH_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        ("DASH_PROCESSING_DELAY_MS".to_string(), "0".to_string()),
        ("DASH_MODEL_DELAY_MS".to_string(), "0".to_string()),
    ]);
    kv.extend(extra);

    let config =
        datapilot_dashboard::config::DashConfig::from_kv(&kv).expect("dash config should be valid");

    let app = datapilot_dashboard::http::router(config);

    spawn_server(app).await
}

async fn spawn_server(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    (addr, shutdown_tx)
}

async fn wait_for_health(client: &reqwest::Client, addr: SocketAddr) {
    let url = format!("http://{}/health", addr);

    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("server did not become ready at {}", url);
}
