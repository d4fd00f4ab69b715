use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::credentials::Credentials;
use crate::error::{ChatClientError, CoreResult};
use crate::stream::ByteStream;

/// Request context carries the caller's correlation id.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults, auth and error mapping.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
    credentials: Credentials,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg, credentials: Credentials) -> CoreResult<Self> {
        // No client-wide total timeout: it would also cut long event streams.
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder.build().map_err(|e| {
            ChatClientError::Other(anyhow::anyhow!("http client build failed: {e}"))
        })?;
        Ok(Self {
            inner,
            user_agent: cfg.user_agent.clone(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
            credentials,
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default(), Credentials::new())
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn request(&self, method: Method, url: &str, ctx: &RequestCtx<'_>) -> RequestBuilder {
        let mut req = self
            .inner
            .request(method, url)
            .header(USER_AGENT, &self.user_agent);
        if let Some(bearer) = self.credentials.bearer() {
            req = req.header(AUTHORIZATION, bearer);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }

    /// Send and map transport failures and non-2xx statuses to `ChatClientError`.
    /// A 401/403 clears the stored credentials.
    async fn send(&self, req: RequestBuilder) -> CoreResult<Response> {
        let start = Instant::now();
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(error = %e, "request failed before a response arrived");
            ChatClientError::BackendUnavailable { status: None }
        })?;

        let status = resp.status();
        tracing::debug!(
            url = %resp.url(),
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "response received"
        );
        if status.is_success() {
            return Ok(resp);
        }

        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(status = status.as_u16(), "credentials rejected; clearing token");
            self.credentials.clear();
        }
        Err(map_http_error(status, parse_retry_after(&headers), &body))
    }

    async fn decode_json<R: DeserializeOwned>(resp: Response) -> CoreResult<R> {
        let status = resp.status();
        resp.json::<R>().await.map_err(|e| ChatClientError::Backend {
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .request(Method::GET, url, ctx)
            .timeout(self.request_timeout);
        Self::decode_json(self.send(req).await?).await
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .request(Method::POST, url, ctx)
            .timeout(self.request_timeout)
            .json(body);
        Self::decode_json(self.send(req).await?).await
    }

    pub async fn delete_json<R: DeserializeOwned>(
        &self,
        url: &str,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .request(Method::DELETE, url, ctx)
            .timeout(self.request_timeout);
        Self::decode_json(self.send(req).await?).await
    }

    /// POST `application/x-www-form-urlencoded`.
    pub async fn post_form<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        form: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .request(Method::POST, url, ctx)
            .timeout(self.request_timeout)
            .form(form);
        Self::decode_json(self.send(req).await?).await
    }

    pub async fn post_multipart<R: DeserializeOwned>(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self
            .request(Method::POST, url, ctx)
            .timeout(self.request_timeout)
            .multipart(form);
        Self::decode_json(self.send(req).await?).await
    }

    /// POST JSON and return the raw response body with its content type.
    pub async fn post_json_for_bytes<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(Option<String>, Bytes)> {
        let req = self
            .request(Method::POST, url, ctx)
            .timeout(self.request_timeout)
            .json(body);
        let resp = self.send(req).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, "response body read failed");
            ChatClientError::BackendUnavailable { status: None }
        })?;
        Ok((content_type, bytes))
    }

    /// POST JSON and return the response body as a chunk stream for SSE decoding.
    /// Not bounded by the request timeout.
    pub async fn post_event_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ByteStream> {
        let req = self
            .request(Method::POST, url, ctx)
            .header(ACCEPT, "text/event-stream")
            .json(body);
        let resp = self.send(req).await?;
        let chunks = resp.bytes_stream().map(|r| {
            r.map_err(|e| {
                tracing::warn!(error = %e, "event stream read failed");
                ChatClientError::BackendUnavailable { status: None }
            })
        });
        Ok(Box::pin(chunks))
    }
}

fn parse_retry_after(headers: &http::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get(RETRY_AFTER)
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ChatClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatClientError::AuthRejected {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => ChatClientError::RateLimited { retry_after },
        s if s.is_server_error() => ChatClientError::BackendUnavailable {
            status: Some(s.as_u16()),
        },
        s => ChatClientError::Backend {
            code: s.as_u16().to_string(),
            message: error_detail(body),
        },
    }
}

/// FastAPI puts the reason in `{"detail": ...}`; fall back to the raw body.
fn error_detail(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(detail) = map.get("detail")
    {
        return match detail {
            serde_json::Value::String(s) => truncate(s, 300),
            other => truncate(&other.to_string(), 300),
        };
    }
    truncate(body, 300)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
