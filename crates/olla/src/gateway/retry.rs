//! Backoff for idempotent PostgREST reads.

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::warn;

use super::store::StoreError;

/// Attempts after the first one.
const READ_RETRIES: u32 = 3;

const FIRST_BACKOFF: Duration = Duration::from_millis(200);

/// 200ms, 400ms, 800ms.
fn backoff(retry: u32) -> Duration {
    FIRST_BACKOFF * 2u32.pow(retry)
}

/// Gateway hiccups a read can outlast. Anything else is the caller's to map.
fn transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Send a read until it gets a non-transient answer or the retries run out.
///
/// Transport failures become `StoreError::Transport` once exhausted. A transient
/// status that persists is handed back so the caller's status mapping applies.
pub(crate) async fn read_with_backoff<F, Fut>(
    operation: &str,
    send: F,
) -> Result<Response, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut retry = 0;
    loop {
        let failure = match send().await {
            Ok(response) if !transient(response.status()) => return Ok(response),
            Ok(response) if retry == READ_RETRIES => return Ok(response),
            Ok(response) => format!("status {}", response.status()),
            Err(err) if retry == READ_RETRIES => {
                return Err(StoreError::Transport(format!("{operation}: {err}")))
            }
            Err(err) => err.to_string(),
        };

        let delay = backoff(retry);
        retry += 1;
        warn!(operation, retry, %failure, ?delay, "store read failed, backing off");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn backoff_doubles_from_two_hundred_millis() {
        let delays: Vec<_> = (0..READ_RETRIES).map(backoff).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800)
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_store_is_a_transport_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .expect("client builds");

        let result = read_with_backoff("get orders", || {
            calls.fetch_add(1, Ordering::SeqCst);
            client.get("http://127.0.0.1:1/").send()
        })
        .await;

        assert!(
            matches!(result, Err(StoreError::Transport(ref detail)) if detail.starts_with("get orders"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), READ_RETRIES + 1);
    }

    #[tokio::test]
    async fn unavailable_gateway_is_retried_until_it_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/orders"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/rest/v1/orders", server.uri());
        let response = read_with_backoff("get orders", || client.get(&url).send())
            .await
            .expect("store answers");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = read_with_backoff("get orders", || client.get(server.uri()).send())
            .await
            .expect("answered");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
