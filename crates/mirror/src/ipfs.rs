//! IPFS daemon adapter (Kubo RPC API).
//!
//! Short calls (`add`, `cat`, `pubsub pub`, `id`, `pin rm`) run with the
//! configured timeout and bounded exponential-backoff retries; the pubsub
//! subscribe stream is long-lived and never timed out; the subscriber loop
//! owns its restart policy.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MirrorError, Result};
use crate::manifest::multibase_encode;

/// Retry configuration for API requests
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// A message received from a pubsub subscription. `data` is the payload as
/// carried on the wire; callers run the announcement decode chain over it.
#[derive(Debug, Clone)]
pub struct PubsubMessage {
    pub from: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait IpfsApi: Send + Sync {
    /// Add bytes as a pinned CIDv1 object; returns the CID.
    async fn add(&self, name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Stream the content behind a CID.
    async fn cat(&self, cid: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    async fn pubsub_pub(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Long-lived subscription; the stream ends when the daemon drops it.
    async fn pubsub_sub(&self, topic: &str)
        -> Result<BoxStream<'static, Result<PubsubMessage>>>;

    /// Own peer id.
    async fn id(&self) -> Result<String>;

    async fn pin_rm(&self, cid: &str) -> Result<()>;
}

/// Multibase form of a topic as it appears in RPC query strings.
pub fn encode_topic(topic: &str) -> String {
    multibase_encode(topic.as_bytes())
}

#[derive(Clone)]
pub struct HttpIpfsClient {
    base_url: String,
    http: reqwest::Client,
    /// No request timeout; used only for the subscribe stream.
    http_streaming: reqwest::Client,
    retry_config: RetryConfig,
}

impl HttpIpfsClient {
    pub fn new(base_url: impl Into<String>, http_timeout: Duration) -> Self {
        Self::with_retry_config(base_url, http_timeout, RetryConfig::default())
    }

    pub fn with_retry_config(
        base_url: impl Into<String>,
        http_timeout: Duration,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(http_timeout)
                .build()
                .unwrap_or_default(),
            http_streaming: reqwest::Client::builder().build().unwrap_or_default(),
            retry_config,
        }
    }

    /// Execute a request with exponential backoff retry logic
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay_ms = self.retry_config.initial_delay_ms;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;

                    if !e.is_retryable() || attempt >= self.retry_config.max_retries {
                        match e.log_level() {
                            tracing::Level::ERROR => {
                                tracing::error!("Request failed after {} attempts: {}", attempt, e)
                            }
                            _ => {
                                tracing::warn!("Request failed after {} attempts: {}", attempt, e)
                            }
                        }
                        return Err(e);
                    }

                    debug!(
                        "Request failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt, self.retry_config.max_retries, delay_ms, e
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                    delay_ms = ((delay_ms as f64) * self.retry_config.backoff_multiplier) as u64;
                    delay_ms = delay_ms.min(self.retry_config.max_delay_ms);
                }
            }
        }
    }

    async fn check_status(endpoint: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(MirrorError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl IpfsApi for HttpIpfsClient {
    async fn add(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let url = format!("{}/api/v0/add", self.base_url);
        let client = self.http.clone();
        let name = name.to_string();

        self.retry_request(|| {
            let client = client.clone();
            let url = url.clone();
            let name = name.clone();
            let bytes = bytes.clone();
            async move {
                debug!("Adding {} ({} bytes) to IPFS", name, bytes.len());
                let part = reqwest::multipart::Part::bytes(bytes).file_name(name);
                let form = reqwest::multipart::Form::new().part("file", part);
                let resp = client
                    .post(&url)
                    .query(&[("pin", "true"), ("cid-version", "1")])
                    .multipart(form)
                    .send()
                    .await?;
                let resp = Self::check_status("/api/v0/add", resp).await?;
                let body: Value = resp.json().await?;
                body.get("Hash")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| MirrorError::Decode("add response missing Hash".to_string()))
            }
        })
        .await
    }

    async fn cat(&self, cid: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let url = format!("{}/api/v0/cat", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("arg", cid)])
            .send()
            .await?;
        let resp = Self::check_status("/api/v0/cat", resp).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(MirrorError::from(e)),
            })
            .boxed();
        Ok(stream)
    }

    async fn pubsub_pub(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let url = format!("{}/api/v0/pubsub/pub", self.base_url);
        let encoded_topic = encode_topic(topic);
        let client = self.http.clone();
        let payload = payload.to_vec();

        self.retry_request(|| {
            let client = client.clone();
            let url = url.clone();
            let encoded_topic = encoded_topic.clone();
            let payload = payload.clone();
            async move {
                let part = reqwest::multipart::Part::bytes(payload).file_name("payload");
                let form = reqwest::multipart::Form::new().part("file", part);
                let resp = client
                    .post(&url)
                    .query(&[("arg", encoded_topic.as_str())])
                    .multipart(form)
                    .send()
                    .await?;
                Self::check_status("/api/v0/pubsub/pub", resp).await?;
                Ok(())
            }
        })
        .await
    }

    async fn pubsub_sub(
        &self,
        topic: &str,
    ) -> Result<BoxStream<'static, Result<PubsubMessage>>> {
        let url = format!("{}/api/v0/pubsub/sub", self.base_url);
        let encoded_topic = encode_topic(topic);
        let resp = self
            .http_streaming
            .post(&url)
            .query(&[("arg", encoded_topic.as_str())])
            .send()
            .await?;
        let resp = Self::check_status("/api/v0/pubsub/sub", resp).await?;
        let chunks: BoxStream<'static, Result<Vec<u8>>> = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(MirrorError::from))
            .boxed();

        struct SubState {
            stream: BoxStream<'static, Result<Vec<u8>>>,
            buffer: Vec<u8>,
        }

        let state = SubState {
            stream: chunks,
            buffer: Vec::new(),
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                    let line = &line[..line.len() - 1];
                    if line.is_empty() {
                        continue;
                    }
                    match parse_sub_line(line) {
                        Some(message) => return Some((Ok(message), state)),
                        None => {
                            warn!("Skipping unparseable pubsub line ({} bytes)", line.len());
                            continue;
                        }
                    }
                }
                match state.stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn id(&self) -> Result<String> {
        let url = format!("{}/api/v0/id", self.base_url);
        let client = self.http.clone();
        self.retry_request(|| {
            let client = client.clone();
            let url = url.clone();
            async move {
                let resp = client.post(&url).send().await?;
                let resp = Self::check_status("/api/v0/id", resp).await?;
                let body: Value = resp.json().await?;
                body.get("ID")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| MirrorError::Decode("id response missing ID".to_string()))
            }
        })
        .await
    }

    async fn pin_rm(&self, cid: &str) -> Result<()> {
        let url = format!("{}/api/v0/pin/rm", self.base_url);
        let client = self.http.clone();
        let cid = cid.to_string();
        self.retry_request(|| {
            let client = client.clone();
            let url = url.clone();
            let cid = cid.clone();
            async move {
                let resp = client.post(&url).query(&[("arg", cid.as_str())]).send().await?;
                Self::check_status("/api/v0/pin/rm", resp).await?;
                Ok(())
            }
        })
        .await
    }
}

/// One line of the subscribe ndjson stream.
fn parse_sub_line(line: &[u8]) -> Option<PubsubMessage> {
    let value: Value = serde_json::from_slice(line).ok()?;
    let from = value.get("from").and_then(Value::as_str)?.to_string();
    let data = value.get("data").and_then(Value::as_str)?.to_string();
    Some(PubsubMessage {
        from,
        data: data.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    fn client(uri: &str) -> HttpIpfsClient {
        HttpIpfsClient::with_retry_config(uri, Duration::from_secs(5), no_retry())
    }

    // -----------------------------------------------------------------------
    // Topic encoding
    // -----------------------------------------------------------------------

    #[test]
    fn test_topic_multibase_encoding() {
        // base64url("stargate-uploads"), no padding, `u` prefix.
        assert_eq!(encode_topic("stargate-uploads"), "uc3RhcmdhdGUtdXBsb2Fkcw");
    }

    // -----------------------------------------------------------------------
    // add / cat
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_add_returns_cid() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .and(query_param("pin", "true"))
            .and(query_param("cid-version", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"Name\":\"hello.txt\",\"Hash\":\"bafyabc\",\"Size\":\"10\"}",
            ))
            .mount(&mock_server)
            .await;

        let cid = client(&mock_server.uri())
            .add("hello.txt", b"hi".to_vec())
            .await
            .unwrap();
        assert_eq!(cid, "bafyabc");
    }

    #[tokio::test]
    async fn test_add_500_surfaces_api_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server.uri())
            .add("x", vec![1])
            .await
            .unwrap_err();
        match err {
            MirrorError::Api { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_retries_transient_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(ResponseTemplate::new(500).set_body_string("flaky"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"Hash\":\"bafyretry\"}"),
            )
            .mount(&mock_server)
            .await;

        let cfg = RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 1.0,
        };
        let client =
            HttpIpfsClient::with_retry_config(mock_server.uri(), Duration::from_secs(5), cfg);
        let cid = client.add("x", vec![1]).await.unwrap();
        assert_eq!(cid, "bafyretry");
    }

    #[tokio::test]
    async fn test_cat_streams_bytes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/cat"))
            .and(query_param("arg", "bafyabc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&mock_server)
            .await;

        let mut stream = client(&mock_server.uri()).cat("bafyabc").await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend(chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    // -----------------------------------------------------------------------
    // pubsub
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pubsub_pub_uses_multibase_topic() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/pubsub/pub"))
            .and(query_param("arg", "uc3RhcmdhdGUtdXBsb2Fkcw"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        client(&mock_server.uri())
            .pubsub_pub("stargate-uploads", b"payload")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pubsub_sub_parses_ndjson_lines() {
        let mock_server = MockServer::start().await;
        let body = concat!(
            "{\"from\":\"peer-a\",\"data\":\"uSGVsbG8\",\"seqno\":\"1\"}\n",
            "not json\n",
            "{\"from\":\"peer-b\",\"data\":\"uV29ybGQ\"}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/v0/pubsub/sub"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let mut stream = client(&mock_server.uri())
            .pubsub_sub("stargate-uploads")
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.from, "peer-a");
        assert_eq!(first.data, b"uSGVsbG8");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.from, "peer-b");
        assert!(stream.next().await.is_none());
    }

    // -----------------------------------------------------------------------
    // id / pin rm
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_id_returns_peer_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"ID\":\"12D3KooWpeer\"}"),
            )
            .mount(&mock_server)
            .await;

        let peer = client(&mock_server.uri()).id().await.unwrap();
        assert_eq!(peer, "12D3KooWpeer");
    }

    #[tokio::test]
    async fn test_pin_rm() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/pin/rm"))
            .and(query_param("arg", "bafyabc"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        client(&mock_server.uri()).pin_rm("bafyabc").await.unwrap();
    }
}
