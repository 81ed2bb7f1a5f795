//! Integration tests for tdc-survey HTTP endpoints
//!
//! Drives the router with `oneshot` against an in-memory store and the
//! sample question table under `data/`.

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tdc_common::config::{CounterUpdate, MissingAssetPolicy, SurveyConfig};
use tdc_survey::controller::SurveyController;
use tdc_survey::design::QuestionBank;
use tdc_survey::session::SessionRegistry;
use tdc_survey::store::{MemoryStore, RetryPolicy, Table};
use tdc_survey::{build_router, AppState};
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    sessions: SessionRegistry,
    _assets: TempDir,
}

fn design_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/optimized_design.csv")
}

/// Test helper: app over `store` with every sample door image present
fn setup_app(store: Arc<MemoryStore>) -> Harness {
    setup_app_with(store, &[3, 6, 9, 12, 15], MissingAssetPolicy::Error, RetryPolicy::none())
}

fn setup_app_with(
    store: Arc<MemoryStore>,
    images: &[u32],
    missing_asset: MissingAssetPolicy,
    retry: RetryPolicy,
) -> Harness {
    let assets = TempDir::new().unwrap();
    for d2d in images {
        std::fs::write(assets.path().join(format!("door_d2d_{}.png", d2d)), PNG_BYTES).unwrap();
    }

    let config = SurveyConfig {
        asset_dir: assets.path().to_path_buf(),
        missing_asset,
        design_path: design_path(),
        ..Default::default()
    };
    let bank = Arc::new(QuestionBank::load(&config.design_path).unwrap());
    let controller = SurveyController::new(store.clone(), retry, CounterUpdate::ReadModifyWrite);

    let state = AppState::new(config, bank, controller);
    Harness {
        sessions: state.sessions.clone(),
        app: build_router(state),
        store,
        _assets: assets,
    }
}

/// Percent-encode form pairs
fn form(pairs: &[(&str, &str)]) -> String {
    fn encode(s: &str) -> String {
        s.bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (b as char).to_string()
                }
                _ => format!("%{:02X}", b),
            })
            .collect()
    }
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8(bytes.to_vec()).expect("Body should be UTF-8")
}

impl Harness {
    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(&self, uri: &str, cookie: Option<&str>, body: String) -> Response<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.app
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    /// Cookie handed out on a visit without one, as a `name=value` pair
    async fn cookie(&self) -> String {
        let response = self.get("/", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/?fresh=1");
        response
            .headers()
            .get(header::SET_COOKIE)
            .expect("First visit sets a session cookie")
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    /// First visit, following the cookie redirect; returns the cookie and the page
    async fn open(&self) -> (String, String) {
        let cookie = self.cookie().await;
        let response = self.get("/?fresh=1", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        (cookie, body_text(response).await)
    }

    async fn page(&self, cookie: &str) -> String {
        let response = self.get("/", Some(cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await
    }

    /// Pass the comprehension check and start the survey
    async fn start(&self, cookie: &str, context: &str) {
        let response = self
            .post(
                "/start/confirm",
                Some(cookie),
                form(&[("price", "€3.80"), ("duration", "60 minutes"), ("context", context)]),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = self.post("/start/begin", Some(cookie), String::new()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    async fn answer(&self, cookie: &str, choice: &str) -> Response<Body> {
        self.post(
            "/survey",
            Some(cookie),
            form(&[("choice", choice), ("action", "next")]),
        )
        .await
    }
}

fn demographics() -> String {
    form(&[
        ("age", "30–39"),
        ("gender", "Female"),
        ("travel_frequency", "Weekly"),
        ("ubahn_frequency", "Daily"),
        ("mobility", "0 - No problems"),
        ("comment", "Clear & quick"),
    ])
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let h = setup_app(Arc::new(MemoryStore::new(0)));
    let response = h.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "tdc-survey");
    assert!(json["version"].is_string());
}

// =============================================================================
// Start page
// =============================================================================

#[tokio::test]
async fn test_first_visit_creates_session() {
    let h = setup_app(Arc::new(MemoryStore::new(5)));
    let (cookie, html) = h.open().await;

    assert!(cookie.starts_with("tdc_session="));
    assert!(html.contains("Welcome to the Train Door Choice Experiment"));
    assert!(html.contains("You are traveling in this experiment: <strong>Business traveler, urgent schedule</strong>"));
    assert!(html.contains("You'll see 12 decision tasks"));

    // Same cookie, same session, no second counter read
    let again = h.page(&cookie).await;
    assert!(again.contains("Business traveler, urgent schedule"));
    assert_eq!(h.store.counter_reads().await, 1);
    assert_eq!(h.sessions.len().await, 1);
}

#[tokio::test]
async fn test_cookieless_visits_create_no_sessions() {
    let h = setup_app(Arc::new(MemoryStore::new(5)));
    for _ in 0..500 {
        let response = h.get("/", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    assert!(h.sessions.is_empty().await);
    assert_eq!(h.store.counter_reads().await, 0);
}

#[tokio::test]
async fn test_refused_cookie_gets_explanation() {
    let h = setup_app(Arc::new(MemoryStore::new(5)));
    let response = h.get("/?fresh=1", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(body_text(response).await.contains("Cookies are disabled"));
    assert!(h.sessions.is_empty().await);
    assert_eq!(h.store.counter_reads().await, 0);
}

#[tokio::test]
async fn test_expired_cookie_starts_over() {
    let h = setup_app(Arc::new(MemoryStore::new(5)));
    let cookie = "tdc_session=6f1c1f7e-2a7b-4d51-9a0e-4f2f1f7d8a10";

    let html = h.page(cookie).await;
    assert!(html.contains("Welcome to the Train Door Choice Experiment"));
    assert_eq!(h.sessions.len().await, 1);

    h.start(cookie, "Business traveler, urgent schedule").await;
    assert!(h.page(cookie).await.contains("Question 1 of 12"));
}

#[tokio::test]
async fn test_empty_counter_is_fatal_banner() {
    let h = setup_app(Arc::new(MemoryStore::with_counter_cell(None)));
    let cookie = h.cookie().await;
    let response = h.get("/?fresh=1", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let html = body_text(response).await;
    assert!(html.contains("Meta sheet cell A2 is empty"));
    assert!(h.sessions.is_empty().await);
}

#[tokio::test]
async fn test_non_numeric_counter_is_fatal_banner() {
    let h = setup_app(Arc::new(MemoryStore::with_counter_cell(Some("abc"))));
    let cookie = h.cookie().await;
    let response = h.get("/", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_wrong_context_blocks_start() {
    let h = setup_app(Arc::new(MemoryStore::new(5)));
    let (cookie, _) = h.open().await;

    let response = h
        .post(
            "/start/confirm",
            Some(&cookie),
            form(&[("price", "€3.80"), ("duration", "60 minutes"), ("context", "Alone with a backpack")]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let html = body_text(response).await;
    assert!(html.contains("One or more answers are incorrect"));
    assert!(!html.contains(r#"action="/start/begin""#));

    let response = h.post("/start/begin", Some(&cookie), String::new()).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Price and duration answers are not checked
    let response = h
        .post(
            "/start/confirm",
            Some(&cookie),
            form(&[("price", "€1.80"), ("duration", "10 minutes"), ("context", "Business traveler, urgent schedule")]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");

    let html = h.page(&cookie).await;
    assert!(html.contains(r#"action="/start/begin""#));
}

#[tokio::test]
async fn test_post_without_session_rejected() {
    let h = setup_app(Arc::new(MemoryStore::new(0)));
    let response = h.post("/start/begin", None, String::new()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .post("/start/begin", Some("tdc_session=6f1c1f7e-2a7b-4d51-9a0e-4f2f1f7d8a10"), String::new())
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Survey
// =============================================================================

#[tokio::test]
async fn test_full_survey_flow() {
    let h = setup_app(Arc::new(MemoryStore::new(5)));
    let (cookie, _) = h.open().await;
    h.start(&cookie, "Business traveler, urgent schedule").await;

    let html = h.page(&cookie).await;
    assert!(html.contains("Question 1 of 12"));
    assert!(html.contains("Imagine you are traveling business traveler, urgent schedule."));

    for i in 0..12 {
        let choice = if i % 2 == 0 { "Door B" } else { "None of both" };
        let response = h.answer(&cookie, choice).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "question {}", i + 1);
        if i < 11 {
            assert!(h.store.rows(Table::Responses).await.is_empty());
        }
    }

    let responses = h.store.rows(Table::Responses).await;
    assert_eq!(responses.len(), 12);
    for (i, row) in responses.iter().enumerate() {
        assert_eq!(row[0], "5");
        assert_eq!(row[1], "3.8");
        assert_eq!(row[2], "60");
        assert_eq!(row[3], (i + 1).to_string());
        assert_eq!(row.len(), 5 + 26);
    }
    assert_eq!(responses[0][4], "Door B");
    assert_eq!(responses[1][4], "None of both");
    // Raw question cells follow in file order (first row: A_D2D=9, A_CTD=Red)
    assert_eq!(responses[0][5], "9");
    assert_eq!(responses[0][10], "Red");

    let html = h.page(&cookie).await;
    assert!(html.contains("A Few More Questions"));

    let response = h.post("/demographics", Some(&cookie), demographics()).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let demo = h.store.rows(Table::Demographics).await;
    assert_eq!(demo.len(), 1);
    assert_eq!(demo[0][0], "5");
    assert_eq!(demo[0][1], "30–39");
    assert_eq!(demo[0][6], "Clear & quick");
    assert_eq!(demo[0].len(), 10);
    assert_eq!(h.store.counter_cell().await.as_deref(), Some("6"));

    let html = h.page(&cookie).await;
    assert!(html.contains("Thank You for Your Participation!"));
    assert!(html.contains("You completed the survey in"));
}

#[tokio::test]
async fn test_second_demographics_submission_writes_nothing() {
    let h = setup_app(Arc::new(MemoryStore::new(2)));
    let (cookie, _) = h.open().await;
    h.start(&cookie, "Alone with a backpack").await;
    for _ in 0..12 {
        h.answer(&cookie, "Door A").await;
    }

    let first = h.post("/demographics", Some(&cookie), demographics()).await;
    assert_eq!(first.status(), StatusCode::SEE_OTHER);
    assert_eq!(h.store.counter_writes().await, 1);

    let second = h.post("/demographics", Some(&cookie), demographics()).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(h.store.rows(Table::Demographics).await.len(), 1);
    assert_eq!(h.store.counter_writes().await, 1);
    assert_eq!(h.store.counter_cell().await.as_deref(), Some("3"));

    // Replaying the last survey answer cannot append a second Responses batch
    let replay = h.answer(&cookie, "Door A").await;
    assert_eq!(replay.status(), StatusCode::CONFLICT);
    assert_eq!(h.store.rows(Table::Responses).await.len(), 12);
}

#[tokio::test]
async fn test_back_navigation_keeps_answers() {
    let h = setup_app(Arc::new(MemoryStore::new(0)));
    let (cookie, _) = h.open().await;
    h.start(&cookie, "With friends and luggage").await;

    // Back on the first question stays put
    let response = h
        .post("/survey", Some(&cookie), form(&[("action", "back")]))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(h.page(&cookie).await.contains("Question 1 of 12"));

    h.answer(&cookie, "Door B").await;
    assert!(h.page(&cookie).await.contains("Question 2 of 12"));

    h.post("/survey", Some(&cookie), form(&[("choice", "Door A"), ("action", "back")]))
        .await;
    let html = h.page(&cookie).await;
    assert!(html.contains("Question 1 of 12"));
    assert!(html.contains(r#"value="Door B" checked"#));
}

#[tokio::test]
async fn test_invalid_choice_rejected_inline() {
    let h = setup_app(Arc::new(MemoryStore::new(0)));
    let (cookie, _) = h.open().await;
    h.start(&cookie, "With friends and luggage").await;

    let response = h.answer(&cookie, "Door C").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let html = body_text(response).await;
    assert!(html.contains("Unknown choice"));
    assert!(html.contains("Question 1 of 12"));
}

#[tokio::test]
async fn test_store_failure_keeps_participant_on_last_question() {
    let store = Arc::new(MemoryStore::new(1));
    let h = setup_app(store.clone());
    let (cookie, _) = h.open().await;
    h.start(&cookie, "Business traveler, urgent schedule").await;
    for _ in 0..11 {
        h.answer(&cookie, "Door A").await;
    }

    store.fail_next(1).await;
    let response = h.answer(&cookie, "Door B").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_text(response).await.contains("could not be saved"));
    assert!(store.rows(Table::Responses).await.is_empty());
    assert!(h.page(&cookie).await.contains("Question 12 of 12"));

    let response = h.answer(&cookie, "Door B").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(store.rows(Table::Responses).await.len(), 12);
}

// =============================================================================
// Door images
// =============================================================================

#[tokio::test]
async fn test_missing_image_fails_survey_page() {
    let store = Arc::new(MemoryStore::new(0));
    let h = setup_app_with(store, &[3], MissingAssetPolicy::Error, RetryPolicy::none());
    let (cookie, _) = h.open().await;
    h.start(&cookie, "With friends and luggage").await;

    // First question uses D2D 9 and 3
    let response = h.get("/", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("door_d2d_9.png"));
}

#[tokio::test]
async fn test_placeholder_policy_renders_page() {
    let store = Arc::new(MemoryStore::new(0));
    let h = setup_app_with(store, &[], MissingAssetPolicy::Placeholder, RetryPolicy::none());
    let (cookie, _) = h.open().await;
    h.start(&cookie, "With friends and luggage").await;

    assert!(h.page(&cookie).await.contains("Question 1 of 12"));

    let response = h.get("/door-images/999", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/svg+xml");
    assert!(body_text(response).await.contains("Door at 999 m"));
}

#[tokio::test]
async fn test_door_image_route() {
    let h = setup_app(Arc::new(MemoryStore::new(0)));

    let response = h.get("/door-images/3", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], PNG_BYTES);

    let response = h.get("/door-images/999", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
