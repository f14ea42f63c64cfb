use reqwest::{Client, Url};
use std::error::Error as _;
use std::time::Duration;

use crate::error::ProbeError;
use crate::state::{HttpStatusRecord, ResultEvent, SessionContext};

/// Shared client; the timeout bounds each whole request
pub fn build_client(timeout: Duration, use_proxy: bool) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("netprobe/", env!("CARGO_PKG_VERSION")));
    if !use_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}

/// Single GET; only the status line is reported
pub async fn run(ctx: &SessionContext, client: &Client, url: &Url) -> Result<(), ProbeError> {
    ctx.info(format!("Attempting GET request to: {url}"));

    let response = match ctx.guard(client.get(url.clone()).send()).await {
        Ok(response) => response,
        Err(e) => {
            ctx.info("HTTP request timed out or was cancelled.");
            return Err(e);
        }
    };

    match response {
        Ok(response) => {
            let status = response.status();
            ctx.emit(ResultEvent::HttpStatus(HttpStatusRecord {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            }));
            Ok(())
        }
        Err(e) => Err(classify_error(&e)),
    }
}

fn classify_error(err: &reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout("HTTP request timed out or was cancelled".to_string())
    } else if err.is_connect() || err.is_request() {
        ProbeError::Transport(format!("HTTP request failed: {}", root_cause(err)))
    } else {
        ProbeError::Unexpected(err.to_string())
    }
}

/// Innermost error message; reqwest's own Display only names the URL
fn root_cause(err: &reqwest::Error) -> String {
    let mut source = err.source();
    let mut message = err.to_string();
    while let Some(inner) = source {
        message = inner.to_string();
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{drain, run_session, start};
    use crate::error::ErrorKind;
    use crate::state::{ProbeKind, SessionState};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every connection with `response` after `delay`
    async fn serve(response: &'static str, delay: Duration) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{addr}/health")).unwrap()
    }

    fn client(timeout: Duration) -> Client {
        build_client(timeout, false).unwrap()
    }

    #[tokio::test]
    async fn test_status_reported() {
        let url = serve("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n", Duration::ZERO).await;
        let client = client(Duration::from_secs(5));
        let expected = format!("Attempting GET request to: {url}");
        let (state, results) = run_session(ProbeKind::Http, move |ctx| async move {
            run(&ctx, &client, &url).await
        })
        .await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(results[0], ResultEvent::Info(expected));
        assert_eq!(
            results[1],
            ResultEvent::HttpStatus(HttpStatusRecord {
                code: 204,
                reason: "No Content".to_string()
            })
        );
        assert_eq!(results[2], ResultEvent::Done);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let client = client(Duration::from_secs(5));
        let (state, results) = run_session(ProbeKind::Http, move |ctx| async move {
            run(&ctx, &client, &url).await
        })
        .await;

        assert_eq!(state, SessionState::Failed);
        assert!(matches!(
            results[1],
            ResultEvent::Error {
                kind: ErrorKind::Transport,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let url = serve("HTTP/1.1 200 OK\r\n\r\n", Duration::from_secs(10)).await;
        let client = client(Duration::from_millis(100));
        let (state, results) = run_session(ProbeKind::Http, move |ctx| async move {
            run(&ctx, &client, &url).await
        })
        .await;

        assert_eq!(state, SessionState::Failed);
        assert_eq!(
            results[1],
            ResultEvent::Error {
                kind: ErrorKind::Timeout,
                message: "HTTP request timed out or was cancelled".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_in_flight_request() {
        let url = serve("HTTP/1.1 200 OK\r\n\r\n", Duration::from_secs(10)).await;
        let client = client(Duration::from_secs(30));
        let (session, mut rx) = start(ProbeKind::Http, move |ctx| async move {
            run(&ctx, &client, &url).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();

        let (state, results) = drain(&mut rx).await;
        assert_eq!(state, SessionState::Cancelled);
        assert_eq!(
            results[1],
            ResultEvent::Info("HTTP request timed out or was cancelled.".into())
        );
        assert_eq!(results[2], ResultEvent::Done);
    }
}
