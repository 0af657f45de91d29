//! Outbound HTTP, capped on wall-clock time and response size. `reqwest`
//! streams bodies but never caps them itself, so the cap is enforced by
//! hand while draining the byte stream -- the same shape as
//! `core/src/exec.rs`'s `read_capped` loop, just over HTTP chunks instead
//! of a child's stdout pipe.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::registry::Resource;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DATA_LIMIT_BYTES: usize = 128 * 1024;

pub struct HttpResource {
    client: reqwest::Client,
    timeout: Duration,
    data_limit: usize,
}

impl HttpResource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            data_limit: DEFAULT_DATA_LIMIT_BYTES,
        }
    }

    pub fn with_limits(timeout: Duration, data_limit: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            data_limit,
        }
    }

    async fn request(&self, method: reqwest::Method, command: Command) -> Result<Option<Command>> {
        let Some(url) = command.get_str("url").map(str::to_string) else {
            return Ok(Some(command.reply_with([
                ("success".to_string(), Value::Bool(false)),
                ("reason".to_string(), Value::String("No URL given".to_string())),
            ])));
        };

        let mut request = self.client.request(method, &url).timeout(self.timeout);
        if let Some(headers) = command.get("headers").and_then(Value::as_object) {
            for (name, values) in headers {
                if let Some(values) = values.as_array() {
                    for value in values {
                        if let Some(value) = value.as_str() {
                            request = request.header(name.as_str(), value);
                        }
                    }
                } else if let Some(value) = values.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        if let Some(data) = command.get_str("data") {
            request = request.body(data.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(Some(command.reply_with([
                    ("success".to_string(), Value::Bool(false)),
                    ("reason".to_string(), Value::String(e.to_string())),
                ])));
            }
        };
        let code = response.status().as_u16();
        let body = capped_body(response, self.data_limit).await?;
        Ok(Some(command.reply_with([
            ("success".to_string(), Value::Bool(true)),
            ("code".to_string(), Value::Number(code.into())),
            (
                "body".to_string(),
                Value::String(String::from_utf8_lossy(&body).into_owned()),
            ),
        ])))
    }
}

impl Default for HttpResource {
    fn default() -> Self {
        Self::new()
    }
}

async fn capped_body(response: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = limit.saturating_sub(buf.len());
        if remaining == 0 {
            break;
        }
        let take = remaining.min(chunk.len());
        buf.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            break;
        }
    }
    Ok(buf)
}

#[async_trait]
impl Resource for HttpResource {
    fn name(&self) -> &str {
        "http"
    }

    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        match command.cmd.as_str() {
            "get" => self.request(reqwest::Method::GET, command).await,
            "post" => self.request(reqwest::Method::POST, command).await,
            "put" => self.request(reqwest::Method::PUT, command).await,
            "delete" => self.request(reqwest::Method::DELETE, command).await,
            "head" => self.request(reqwest::Method::HEAD, command).await,
            _ => {
                super::unknown_operation(api, "http", &command).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::AppConfig;
    use crate::registry::ResourceRegistry;
    use std::collections::HashMap;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    fn api() -> SandboxApi {
        let config = AppConfig {
            sandbox: HashMap::new(),
            executable: "/bin/true".to_string(),
            args: Vec::new(),
            path: None,
            env: HashMap::new(),
            timeout_secs: 60,
            recv_limit_bytes: 1024,
            rlimits: HashMap::new(),
            logging_resource: None,
            javascript: None,
            javascript_file: None,
            app_context: None,
        };
        SandboxApi::new("sandbox-1", Arc::new(ResourceRegistry::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn get_without_url_fails_without_making_a_request() {
        let api = api();
        let http = HttpResource::new();
        let reply = http.dispatch(&api, Command::new("get")).await.unwrap().unwrap();
        assert_eq!(reply.get("success"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn get_returns_status_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let api = api();
        let http = HttpResource::new();
        let reply = http
            .dispatch(
                &api,
                Command::new("get").with_field("url", format!("{}/ping", server.uri())),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("success"), Some(&Value::Bool(true)));
        assert_eq!(reply.get("code"), Some(&Value::Number(200.into())));
        assert_eq!(reply.get_str("body"), Some("pong"));
    }

    #[tokio::test]
    async fn head_returns_status_code_with_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let api = api();
        let http = HttpResource::new();
        let reply = http
            .dispatch(
                &api,
                Command::new("head").with_field("url", format!("{}/ping", server.uri())),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("success"), Some(&Value::Bool(true)));
        assert_eq!(reply.get("code"), Some(&Value::Number(204.into())));
    }

    #[tokio::test]
    async fn response_body_is_truncated_at_the_data_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let api = api();
        let http = HttpResource::with_limits(Duration::from_secs(5), 10);
        let reply = http
            .dispatch(
                &api,
                Command::new("get").with_field("url", format!("{}/big", server.uri())),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get_str("body").map(str::len), Some(10));
    }
}
