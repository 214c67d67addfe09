use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use super::router;
use crate::cache::TtlCache;
use crate::cache::testing::ManualClock;
use crate::config::CacheKeyMode;
use crate::error::{RATE_LIMITED_MESSAGE, UNCONFIGURED_MESSAGE};
use crate::models::AnalyzeResult;
use crate::prompts::Task;
use crate::state::AppState;
use crate::upstream::UpstreamClient;

const IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAE=";

fn test_state(
    server: &ServerGuard,
    api_key: Option<&str>,
    cache: TtlCache<AnalyzeResult>,
) -> Arc<AppState> {
    let upstream = UpstreamClient::new(
        reqwest::Client::new(),
        server.url(),
        api_key.map(str::to_string),
        "gpt-4.1",
    );
    Arc::new(AppState::new(upstream, cache, CacheKeyMode::Fnv))
}

fn app_for(server: &ServerGuard) -> axum::Router {
    router(
        test_state(server, Some("sk-test"), TtlCache::new(Duration::from_secs(3600))),
        1024 * 1024,
    )
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> Response {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(req).await.unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

fn output_text(text: &str) -> String {
    json!({ "output_text": text }).to_string()
}

// Mock for one task, told apart by its max_output_tokens
async fn task_mock(
    server: &mut ServerGuard,
    task: Task,
    status: usize,
    body: String,
    hits: usize,
) -> Mock {
    server
        .mock("POST", "/responses")
        .match_body(Matcher::PartialJson(
            json!({ "max_output_tokens": task.max_output_tokens() }),
        ))
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn transcript_returns_text() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/responses")
        .match_body(Matcher::Regex("input_image".to_string()))
        .with_status(200)
        .with_body(output_text("吾輩は猫である。"))
        .create_async()
        .await;

    let body = json!({ "imageBase64": IMAGE });
    let resp = post_json(app_for(&server), "/api/transcript", body).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "transcript": "吾輩は猫である。" }));
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_fields_are_bad_requests() {
    let server = mockito::Server::new_async().await;

    let cases = [
        ("/api/transcript", json!({}), "imageBase64 is required"),
        ("/api/analyze", json!({ "imageBase64": "" }), "imageBase64 is required"),
        ("/api/summary", json!({}), "transcript is required"),
        ("/api/questions", json!({ "transcript": null }), "transcript is required"),
        ("/api/suggest", json!({ "messages": [] }), "summary is required"),
        ("/api/chat", json!({ "messages": [] }), "summary is required"),
        ("/api/chat", json!({ "summary": "要約" }), "messages is required"),
        (
            "/api/chat",
            json!({ "summary": "要約", "messages": [{ "role": "system", "content": "x" }] }),
            "messages is required",
        ),
    ];

    for (uri, body, message) in cases {
        let resp = post_json(app_for(&server), uri, body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_text(resp).await, message, "{}", uri);
    }
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let server = mockito::Server::new_async().await;
    let req = Request::post("/api/summary")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let resp = app_for(&server).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_api_key_fails_closed() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/responses").expect(0).create_async().await;
    let app = router(
        test_state(&server, None, TtlCache::new(Duration::from_secs(60))),
        1024 * 1024,
    );

    let resp = post_json(app.clone(), "/api/summary", json!({ "transcript": "本文" })).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(resp).await, UNCONFIGURED_MESSAGE);

    // validation still comes first
    let resp = post_json(app, "/api/summary", json!({})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_on_every_route() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/responses")
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit reached for gpt-4.1"}}"#)
        .expect_at_least(1)
        .create_async()
        .await;

    let messages = json!([{ "role": "user", "content": "これは何？" }]);
    let cases = [
        ("/api/transcript", json!({ "imageBase64": IMAGE })),
        ("/api/summary", json!({ "transcript": "本文" })),
        ("/api/questions", json!({ "transcript": "本文" })),
        ("/api/suggest", json!({ "summary": "要約", "messages": messages })),
        ("/api/analyze", json!({ "imageBase64": IMAGE })),
        ("/api/chat", json!({ "summary": "要約", "messages": messages })),
        ("/api/chat", json!({ "summary": "要約", "messages": messages, "stream": false })),
    ];

    for (uri, body) in cases {
        let resp = post_json(app_for(&server), uri, body).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS, "{}", uri);
        assert_eq!(body_text(resp).await, RATE_LIMITED_MESSAGE, "{}", uri);
    }
}

#[tokio::test]
async fn empty_upstream_text_is_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/responses")
        .with_status(200)
        .with_body(r#"{"output_text":"","output":[{"type":"message","content":[]}]}"#)
        .create_async()
        .await;

    let resp = post_json(app_for(&server), "/api/summary", json!({ "transcript": "本文" })).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_text(resp).await, Task::Summarize.empty_message());
}

#[tokio::test]
async fn upstream_status_and_message_pass_through() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/responses")
        .with_status(400)
        .with_body(r#"{"error":{"message":"Invalid image data"}}"#)
        .create_async()
        .await;

    let body = json!({ "imageBase64": "data:," });
    let resp = post_json(app_for(&server), "/api/transcript", body).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(resp).await, "Invalid image data");
}

#[tokio::test]
async fn questions_are_cleaned_and_truncated() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/responses")
        .with_status(200)
        .with_body(output_text(r#"["質問1","「質問2」","- 質問3","質問4"]"#))
        .create_async()
        .await;

    let resp = post_json(app_for(&server), "/api/questions", json!({ "transcript": "本文" })).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "questions": ["質問1", "質問2", "質問3"] }));
}

#[tokio::test]
async fn unusable_questions_are_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/responses")
        .with_status(200)
        .with_body(output_text("- \n「」"))
        .create_async()
        .await;

    let resp = post_json(app_for(&server), "/api/questions", json!({ "transcript": "本文" })).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_text(resp).await, Task::Questions.empty_message());
}

#[tokio::test]
async fn suggest_includes_history() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/responses")
        .match_body(Matcher::Regex("これまでの会話:\\\\nユーザー: 作者は？".to_string()))
        .with_status(200)
        .with_body(output_text("1. いつ書かれた？\n2. 舞台はどこ？"))
        .create_async()
        .await;

    let resp = post_json(
        app_for(&server),
        "/api/suggest",
        json!({
            "summary": "要約",
            "messages": [{ "role": "user", "content": "作者は？" }, { "bogus": true }]
        }),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({ "questions": ["いつ書かれた？", "舞台はどこ？"] })
    );
    mock.assert_async().await;
}

fn analysis_body() -> String {
    output_text(
        &json!({
            "summary": "猫の独白です。",
            "questions": ["名前は？", "どこで生まれた？", "誰に飼われた？", "四つ目"]
        })
        .to_string(),
    )
}

#[tokio::test]
async fn analyze_second_call_is_served_from_cache() {
    let mut server = mockito::Server::new_async().await;
    let transcript = task_mock(
        &mut server,
        Task::AnalyzeTranscript,
        200,
        output_text("吾輩は猫である。"),
        1,
    )
    .await;
    let summary = task_mock(&mut server, Task::AnalyzeSummary, 200, analysis_body(), 1).await;
    let app = app_for(&server);

    let first = post_json(app.clone(), "/api/analyze", json!({ "imageBase64": IMAGE })).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-cache").is_none());
    let first = body_json(first).await;
    assert_eq!(
        first,
        json!({
            "summary": "猫の独白です。",
            "transcript": "吾輩は猫である。",
            "questions": ["名前は？", "どこで生まれた？", "誰に飼われた？"]
        })
    );

    let second = post_json(app, "/api/analyze", json!({ "imageBase64": IMAGE })).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(body_json(second).await, first);

    transcript.assert_async().await;
    summary.assert_async().await;
}

#[tokio::test]
async fn analyze_calls_again_after_ttl() {
    let mut server = mockito::Server::new_async().await;
    let transcript = task_mock(
        &mut server,
        Task::AnalyzeTranscript,
        200,
        output_text("吾輩は猫である。"),
        2,
    )
    .await;
    let summary = task_mock(&mut server, Task::AnalyzeSummary, 200, analysis_body(), 2).await;

    let clock = Arc::new(ManualClock::new());
    let state = test_state(
        &server,
        Some("sk-test"),
        TtlCache::with_clock(Duration::from_secs(3600), clock.clone()),
    );
    let app = router(state.clone(), 1024 * 1024);

    let resp = post_json(app.clone(), "/api/analyze", json!({ "imageBase64": IMAGE })).await;
    assert_eq!(resp.status(), StatusCode::OK);

    clock.advance(Duration::from_secs(3600));

    let resp = post_json(app, "/api/analyze", json!({ "imageBase64": IMAGE })).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("x-cache").is_none());
    assert_eq!(state.cache.len(), 1);

    transcript.assert_async().await;
    summary.assert_async().await;
}

#[tokio::test]
async fn analyze_failure_in_second_step_is_not_cached() {
    let mut server = mockito::Server::new_async().await;
    let _mock = task_mock(
        &mut server,
        Task::AnalyzeTranscript,
        200,
        output_text("吾輩は猫である。"),
        1,
    )
    .await;
    let _mock = task_mock(
        &mut server,
        Task::AnalyzeSummary,
        500,
        r#"{"error":{"message":"The server had an error"}}"#.to_string(),
        1,
    )
    .await;
    let state = test_state(&server, Some("sk-test"), TtlCache::new(Duration::from_secs(60)));

    let resp = post_json(
        router(state.clone(), 1024 * 1024),
        "/api/analyze",
        json!({ "imageBase64": IMAGE }),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(resp).await, "The server had an error");
    assert!(state.cache.is_empty());
    assert_eq!(state.in_flight.len(), 0);
}

#[tokio::test]
async fn analyze_without_summary_json_is_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    let _mock = task_mock(
        &mut server,
        Task::AnalyzeTranscript,
        200,
        output_text("吾輩は猫である。"),
        1,
    )
    .await;
    let _mock = task_mock(
        &mut server,
        Task::AnalyzeSummary,
        200,
        output_text("すみません、要約できません。"),
        1,
    )
    .await;

    let resp = post_json(app_for(&server), "/api/analyze", json!({ "imageBase64": IMAGE })).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_text(resp).await, Task::AnalyzeSummary.empty_message());
}

#[tokio::test]
async fn concurrent_analyze_shares_one_upstream_run() {
    let mut server = mockito::Server::new_async().await;
    let transcript = server
        .mock("POST", "/responses")
        .match_body(Matcher::PartialJson(
            json!({ "max_output_tokens": Task::AnalyzeTranscript.max_output_tokens() }),
        ))
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(200));
            w.write_all(output_text("吾輩は猫である。").as_bytes())
        })
        .expect(1)
        .create_async()
        .await;
    let summary = task_mock(&mut server, Task::AnalyzeSummary, 200, analysis_body(), 1).await;
    let app = app_for(&server);

    let (a, b) = tokio::join!(
        post_json(app.clone(), "/api/analyze", json!({ "imageBase64": IMAGE })),
        post_json(app.clone(), "/api/analyze", json!({ "imageBase64": IMAGE })),
    );

    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(body_json(a).await, body_json(b).await);
    transcript.assert_async().await;
    summary.assert_async().await;
}

#[tokio::test]
async fn chat_streams_plain_text() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/responses")
        .match_body(Matcher::PartialJson(json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "event: response.output_text.delta\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"猫は\"}\n\n",
            "event: response.output_text.delta\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"名前がない。\"}\n\n",
            "event: response.output_text.done\n",
            "data: {\"type\":\"response.output_text.done\",\"text\":\"猫は名前がない。\"}\n\n",
            "data: [DONE]\n\n",
        ))
        .create_async()
        .await;

    let resp = post_json(
        app_for(&server),
        "/api/chat",
        json!({
            "imageBase64": IMAGE,
            "summary": "要約",
            "messages": [{ "role": "user", "content": "猫の名前は？" }]
        }),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(resp.headers()["cache-control"], "no-cache, no-transform");
    assert_eq!(resp.headers()["x-accel-buffering"], "no");
    assert_eq!(body_text(resp).await, "猫は名前がない。");
    mock.assert_async().await;
}

#[tokio::test]
async fn chat_without_streaming_returns_reply() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/responses")
        .with_status(200)
        .with_body(output_text("名前はまだ無い。"))
        .create_async()
        .await;

    let resp = post_json(
        app_for(&server),
        "/api/chat",
        json!({
            "summary": "要約",
            "messages": [{ "role": "user", "content": "猫の名前は？" }],
            "stream": false
        }),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "reply": "名前はまだ無い。" }));
}

#[tokio::test]
async fn health_and_metrics() {
    crate::metrics::init();
    let server = mockito::Server::new_async().await;
    let app = app_for(&server);

    let resp = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health = body_json(resp).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["upstreamConfigured"], true);

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("page_reader_cache_hits_total"));
}
