use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::{Map, Value};
use tracing::debug;

use super::error::ApiError;
use super::types::{Event, EventQuery, JobStatus};

/// The scheduler operations the hook runtime depends on.
///
/// Calls block the current thread; never call them from inside an async
/// runtime.
pub trait SchedulerApi: Send + Sync {
    /// Asks the scheduler to start `event_id` and report its lifecycle to
    /// `callback_url`.
    fn run_event(&self, event_id: &str, callback_url: &str) -> Result<(), ApiError>;

    fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ApiError>;

    fn get_event(&self, query: &EventQuery) -> Result<Event, ApiError>;
}

/// [`SchedulerApi`] over Cronicle's JSON API (`POST /api/app/<name>/v1`).
pub struct HttpSchedulerApi {
    api_key: String,
    client: Client,
    api_url: Url,
}

impl HttpSchedulerApi {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::UnsupportedScheme(base_url.to_string()));
        }
        let api_url = base
            .join("/api/")
            .map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            api_url,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, ApiError> {
        self.api_url
            .join(&format!("app/{name}/v1"))
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    /// Performs one API call and unwraps Cronicle's `{code, description}`
    /// envelope.
    pub fn call_api(&self, name: &str, mut params: Map<String, Value>) -> Result<Value, ApiError> {
        let url = self.endpoint(name)?;
        params.insert("api_key".into(), Value::from(self.api_key.as_str()));
        debug!(api = name, "calling scheduler API");

        let response = self
            .client
            .post(url)
            .json(&params)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .ok()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text()?;
        let result: Value =
            serde_json::from_str(&text).map_err(|e| ApiError::Unparsable(e.to_string()))?;
        check_envelope(&result)?;
        Ok(result)
    }
}

fn check_envelope(result: &Value) -> Result<(), ApiError> {
    let code = result
        .get("code")
        .ok_or_else(|| ApiError::Unparsable("response has no code".into()))?;
    let ok = code.as_i64() == Some(0) || code.as_str() == Some("0");
    if ok {
        return Ok(());
    }
    let code = match code {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let description = result
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Err(ApiError::Rejected { code, description })
}

fn take_field<T: serde::de::DeserializeOwned>(mut result: Value, field: &str) -> Result<T, ApiError> {
    let value = result
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| ApiError::Unparsable(format!("response has no {field}")))?;
    serde_json::from_value(value).map_err(|e| ApiError::Unparsable(e.to_string()))
}

impl SchedulerApi for HttpSchedulerApi {
    fn run_event(&self, event_id: &str, callback_url: &str) -> Result<(), ApiError> {
        let mut params = Map::new();
        params.insert("id".into(), Value::from(event_id));
        params.insert("web_hook".into(), Value::from(callback_url));
        self.call_api("run_event", params)?;
        Ok(())
    }

    fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        let mut params = Map::new();
        params.insert("id".into(), Value::from(job_id));
        let result = self.call_api("get_job_status", params)?;
        take_field(result, "job")
    }

    fn get_event(&self, query: &EventQuery) -> Result<Event, ApiError> {
        let result = self.call_api("get_event", query.params())?;
        take_field(result, "event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // The client is blocking, so it is built, used and dropped off the async
    // test runtime.
    async fn with_api<T, F>(server: &MockServer, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&HttpSchedulerApi) -> T + Send + 'static,
    {
        let uri = server.uri();
        tokio::task::spawn_blocking(move || {
            let api = HttpSchedulerApi::new(&uri, "secret".into(), Duration::from_secs(5)).unwrap();
            f(&api)
        })
        .await
        .unwrap()
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = HttpSchedulerApi::new("ftp://scheduler", String::new(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::UnsupportedScheme(_)));
    }

    #[test]
    fn rejects_garbage_url() {
        let err = HttpSchedulerApi::new("not a url", String::new(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_event_sends_callback_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/app/run_event/v1"))
            .and(body_partial_json(json!({
                "id": "e1",
                "web_hook": "http://127.0.0.1:4000/h1",
                "api_key": "secret"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "ids": ["j1"]})))
            .expect(1)
            .mount(&server)
            .await;

        let result = with_api(&server, |api| api.run_event("e1", "http://127.0.0.1:4000/h1")).await;
        assert!(result.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_job_status_reads_job_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/app/get_job_status/v1"))
            .and(body_partial_json(json!({"id": "j1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "job": {"complete": 0, "progress": 0.5, "elapsed": 3.0, "hostname": "worker1"}
            })))
            .mount(&server)
            .await;

        let status = with_api(&server, |api| api.get_job_status("j1")).await.unwrap();
        assert!(!status.is_complete());
        assert_eq!(status.progress, Some(0.5));
        assert_eq!(status.extra["hostname"], "worker1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_event_by_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/app/get_event/v1"))
            .and(body_partial_json(json!({"title": "Backup"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "event": {"id": "e9", "title": "Backup", "enabled": 1, "multiplex": 0}
            })))
            .mount(&server)
            .await;

        let event = with_api(&server, |api| api.get_event(&EventQuery::Title("Backup".into())))
            .await
            .unwrap();
        assert_eq!(event.id, "e9");
        assert!(!event.is_multiplex());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nonzero_code_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "session",
                "description": "Invalid API Key"
            })))
            .mount(&server)
            .await;

        let err = with_api(&server, |api| api.get_job_status("j1")).await.unwrap_err();
        match err {
            ApiError::Rejected { code, description } => {
                assert_eq!(code, "session");
                assert_eq!(description, "Invalid API Key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = with_api(&server, |api| api.run_event("e1", "http://x/h")).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unparsable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = with_api(&server, |api| api.run_event("e1", "http://x/h")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unparsable(_)));
    }
}
