//! Build output command.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use runway_core::BuildId;
use tracing::debug;

use crate::client::ApiClient;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Print a build's output, optionally polling until the build finishes.
pub async fn print<W: Write>(
    client: &ApiClient,
    id: BuildId,
    follow: bool,
    out: &mut W,
) -> Result<()> {
    poll(client, id, follow, POLL_INTERVAL, out).await
}

async fn poll<W: Write>(
    client: &ApiClient,
    id: BuildId,
    follow: bool,
    interval: Duration,
    out: &mut W,
) -> Result<()> {
    let mut next_line = 0u64;
    loop {
        let page = client.output(id, next_line).await?;
        for entry in &page.outputs {
            writeln!(out, "{} {}", entry.channel.marker(), entry.content)?;
        }
        out.flush()?;
        next_line += page.outputs.len() as u64;
        debug!(build_id = %id, next_line, status = %page.status, "Polled output");

        if !follow || page.status.is_terminal() {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LINES: [(u8, &str); 3] = [(2, "cloning"), (0, "compiling"), (1, "warning")];

    #[derive(Deserialize)]
    struct Window {
        start: usize,
    }

    /// Reveals one more line per poll and finishes once all are visible.
    async fn output(
        State(polls): State<Arc<AtomicUsize>>,
        Path(_id): Path<u64>,
        Query(window): Query<Window>,
    ) -> Json<Value> {
        let visible = (polls.fetch_add(1, Ordering::SeqCst) + 1).min(LINES.len());
        let outputs: Vec<Value> = LINES[..visible]
            .iter()
            .skip(window.start)
            .map(|(channel, content)| json!({ "Content": content, "Channel": channel }))
            .collect();
        let status = if visible == LINES.len() { "failed" } else { "running" };
        Json(json!({ "Outputs": outputs, "Status": status }))
    }

    async fn fake_server() -> (ApiClient, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/api/v1/builds/{id}/output", get(output))
            .with_state(polls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (ApiClient::new(&format!("http://{}", addr)), polls)
    }

    #[tokio::test]
    async fn test_follow_polls_until_terminal() {
        let (client, polls) = fake_server().await;
        let mut out = Vec::new();

        poll(&client, BuildId::new(1), true, Duration::from_millis(10), &mut out)
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "* cloning\n  compiling\n! warning\n"
        );
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_without_follow_polls_once() {
        let (client, polls) = fake_server().await;
        let mut out = Vec::new();

        poll(&client, BuildId::new(1), false, Duration::from_millis(10), &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "* cloning\n");
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let client = ApiClient::new("http://127.0.0.1:9");
        let mut out = Vec::new();
        assert!(
            poll(&client, BuildId::new(1), false, Duration::from_millis(10), &mut out)
                .await
                .is_err()
        );
    }
}
