//! Retry log output, exercised in its own binary so installing the global
//! logger does not race with the other suites.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use appsync_link::{AppSyncClient, AppSyncTimeouts, Credentials, PostOptions, RetryAttempt};
use log::{Level, Log, Metadata, Record};

use common::{MockHttpServer, ScriptedResponse};

static RETRY_LINES: AtomicUsize = AtomicUsize::new(0);

struct CountingLogger;

impl Log for CountingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record<'_>) {
        if record.level() == Level::Warn && record.args().to_string().contains("retrying") {
            RETRY_LINES.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flush(&self) {}
}

static LOGGER: CountingLogger = CountingLogger;

#[tokio::test]
async fn each_retry_logs_exactly_one_warning() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(log::LevelFilter::Warn);

    let server = MockHttpServer::start(vec![
        ScriptedResponse::json(429, "{}"),
        ScriptedResponse::json(200, r#"{"data":{"ok":true}}"#),
    ])
    .await;

    let client = AppSyncClient::builder()
        .graphql_url(&server.url)
        .region("us-east-1")
        .credentials(Credentials::new("AKID", "secret", None))
        .timeouts(AppSyncTimeouts::fast())
        .build()
        .unwrap();

    let data = client
        .post_with_options(
            "query { ok }",
            None,
            PostOptions {
                retry_strategy: Some(vec![RetryAttempt {
                    delay: Duration::from_millis(1),
                    response_timeout: Duration::from_millis(500),
                }]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(data["ok"], true);
    assert_eq!(RETRY_LINES.load(Ordering::SeqCst), 1);
    assert_eq!(server.requests_served(), 2);
}
