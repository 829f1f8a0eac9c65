// tests/metrics.rs
use axum::body::{self, Body};
use http::{Request, StatusCode};
use tower::ServiceExt;

use intelstream::app;
use intelstream::config::Settings;

// Full in-process app with no chat token and no AI key: dry-run delivery,
// disabled summarizer, empty seed.
async fn build_app() -> app::App {
    for k in [
        "DISCORD_BOT_TOKEN",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
        "AI_CONFIG_PATH",
        "SOURCES_CONFIG_PATH",
        "STATE_PATH",
        "SMTP_HOST",
        "DISCORD_ALERT_WEBHOOK_URL",
        "SLACK_WEBHOOK_URL",
    ] {
        std::env::remove_var(k);
    }
    app::build(Settings::default())
        .await
        .expect("app::build should succeed without credentials")
}

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let app = build_app().await;
    let router = app.router.clone();

    let resp = router
        .clone()
        .oneshot(
            Request::post("/cycles/run?scope=content")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in ["pipeline_cycle_ms", "pipeline_last_cycle_ts"] {
        assert!(text.contains(needle), "missing series {needle} in:\n{text}");
    }

    app.stop();
    for task in app.tasks {
        let _ = task.await;
    }
}
