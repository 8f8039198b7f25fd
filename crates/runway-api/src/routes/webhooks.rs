//! Webhook endpoints for Git providers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::ApiError;
use runway_core::repository::{PullRequestEvent, PushEvent, RepositoryEvent};

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, delivery = %delivery, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    info!(
        event = %event_type,
        delivery = %delivery,
        repo = ?payload.get("repository").and_then(|r| r.get("full_name")).and_then(|n| n.as_str()),
        "Received GitHub webhook"
    );

    let event = match event_type {
        "push" => {
            let push = PushEvent::from_github_payload(&payload)
                .ok_or_else(|| ApiError::BadRequest("malformed push event".to_string()))?;
            if push.deleted {
                info!(git_ref = %push.r#ref, "Ref deleted, nothing to build");
            }
            push.into_repository_event()
        }
        "pull_request" => {
            let pr = PullRequestEvent::from_github_payload(&payload)
                .ok_or_else(|| ApiError::BadRequest("malformed pull_request event".to_string()))?;
            if !pr.triggers_build() {
                info!(number = pr.number, action = %pr.action, "Pull request action does not build");
            }
            pr.into_repository_event()
        }
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            return Ok((StatusCode::OK, Json(json!({ "status": "pong" }))));
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            None
        }
    };

    let Some(event) = event else {
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    };
    let build_id = enqueue(&state, event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "build_id": build_id })),
    ))
}

/// Record a build for the event and hand it to the scheduler.
async fn enqueue(state: &AppState, event: RepositoryEvent) -> Result<u64, ApiError> {
    let RepositoryEvent {
        build_type,
        repository_full_name,
        clone_url,
        ref_name,
        commit_sha,
    } = event;

    let build = state
        .db
        .call(move |db| {
            db.create_repository_build(
                build_type,
                Some(repository_full_name.as_str()),
                &clone_url,
                &ref_name,
                &commit_sha,
            )
        })
        .await?;
    info!(
        build_id = %build.id,
        repo = ?build.repository,
        build_type = %build.build_type,
        ref_name = %build.ref_name,
        sha = %build.short_sha(),
        "Queued build"
    );

    // The build is durable; a restart picks it up if intake is gone.
    if let Err(e) = state.submitter.submit(build.id) {
        error!(build_id = %build.id, error = %e, "Failed to hand build to scheduler");
    }
    Ok(build.id.get())
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::routes::tests::{body_json, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use runway_core::{BuildId, BuildStatus, BuildType};
    use runway_scheduler::Submission;
    use tower::ServiceExt;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn webhook(event: &str, body: &Value, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("X-GitHub-Event", event)
            .header("Content-Type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("X-Hub-Signature-256", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn push_payload(after: &str) -> Value {
        json!({
            "ref": "refs/heads/main",
            "before": "1111111111111111111111111111111111111111",
            "after": after,
            "repository": {
                "full_name": "acme/widgets",
                "clone_url": "https://github.com/acme/widgets.git"
            },
            "pusher": { "name": "octocat" }
        })
    }

    #[tokio::test]
    async fn test_push_queues_build() {
        let (guard, state) = test_state();
        let db = state.db.clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(webhook("push", &push_payload("abc123"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["build_id"], 1);

        let response = app
            .oneshot(webhook("push", &push_payload("def456"), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["build_id"], 2);

        let build = db.build(BuildId::new(1)).unwrap();
        assert_eq!(build.build_type, BuildType::Push);
        assert_eq!(build.ref_name, "main");
        assert_eq!(build.commit_sha, "abc123");
        assert_eq!(build.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(build.status, BuildStatus::Queued);

        let ids: Vec<u64> = db
            .ref_builds(BuildType::Push, "main", 0, -1)
            .unwrap()
            .iter()
            .map(|b| b.id.get())
            .collect();
        assert_eq!(ids, vec![2, 1]);

        assert_eq!(
            guard.intake.next().await,
            Some(Submission::Queued(BuildId::new(1)))
        );
        assert_eq!(
            guard.intake.next().await,
            Some(Submission::Queued(BuildId::new(2)))
        );
    }

    #[tokio::test]
    async fn test_branch_deletion_is_ignored() {
        let (_guard, state) = test_state();
        let db = state.db.clone();
        let payload = push_payload("0000000000000000000000000000000000000000");

        let response = router(state)
            .oneshot(webhook("push", &payload, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ignored");
        assert!(db.pending_builds().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_request_queues_build() {
        let (_guard, state) = test_state();
        let db = state.db.clone();
        let payload = json!({
            "action": "opened",
            "number": 12,
            "repository": { "full_name": "acme/widgets" },
            "pull_request": {
                "head": {
                    "ref": "feature",
                    "sha": "fff999",
                    "repo": { "clone_url": "https://github.com/fork/widgets.git" }
                }
            }
        });

        let response = router(state)
            .oneshot(webhook("pull_request", &payload, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let builds = db.ref_builds(BuildType::PullRequest, "feature", 0, -1).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].clone_url, "https://github.com/fork/widgets.git");
        assert_eq!(builds[0].repository.as_deref(), Some("acme/widgets"));
    }

    #[tokio::test]
    async fn test_ping_and_unknown_events() {
        let (_guard, state) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(webhook("ping", &json!({ "zen": "hi" }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(webhook("issues", &json!({}), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "ignored");
    }

    #[tokio::test]
    async fn test_malformed_payloads() {
        let (_guard, state) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(webhook("push", &json!({ "ref": "refs/heads/main" }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("X-GitHub-Event", "push")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signature_checked_when_secret_set() {
        let (_guard, state) = test_state();
        let db = state.db.clone();
        let app = router(state.with_webhook_secret(Some("s3cret".to_string())));
        let payload = push_payload("abc123");
        let body = payload.to_string();

        let response = app
            .clone()
            .oneshot(webhook("push", &payload, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(webhook("push", &payload, Some(sign("wrong", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(db.pending_builds().unwrap().is_empty());

        let response = app
            .oneshot(webhook("push", &payload, Some(sign("s3cret", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_verify_signature_formats() {
        let body = b"payload";
        let good = sign("key", body);
        assert!(verify_github_signature("key", body, Some(&good)));
        assert!(!verify_github_signature("key", body, None));
        assert!(!verify_github_signature("key", body, Some("sha1=abc")));
        assert!(!verify_github_signature("key", body, Some("sha256=zz")));
    }
}
