//! HTTP client for a remote content store.
//!
//! Speaks `GET`/`PUT {base}/api/upload` and `POST {base}/api/library`.

use ferry_protocol::constants::{
    OFFSET_HEADER, QUERY_INTENT, QUERY_OVERWRITE, QUERY_PATH, QUERY_ROOT, QUERY_SIZE,
    STATUS_CONFLICT,
};
use ferry_protocol::{
    ChunkAck, ChunkRequest, ErrorBody, ProbeRequest, ProbeStatus, RegistrationRequest,
    RegistrationResponse,
};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::UploadError;
use crate::remote::{ChunkBody, LibraryRegistrar, RemoteStore};

/// Remote store and registrar reached over HTTP.
pub struct HttpRemote {
    http: reqwest::Client,
    config: HttpConfig,
}

impl HttpRemote {
    pub fn new(config: HttpConfig) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, config })
    }

    async fn get_status(&self, req: &ProbeRequest) -> Result<ProbeStatus, UploadError> {
        let size = req.size.to_string();
        let resp = self
            .http
            .get(self.config.upload_url())
            .query(&[
                (QUERY_PATH, req.path.as_str()),
                (QUERY_SIZE, size.as_str()),
                (QUERY_ROOT, req.root.as_str()),
                (QUERY_INTENT, req.intent.as_str()),
            ])
            .send()
            .await?;
        decode(resp).await
    }

    async fn send_range(&self, req: &ChunkRequest, body: ChunkBody) -> Result<ChunkAck, UploadError> {
        let size = req.size.to_string();
        let mut query = vec![
            (QUERY_PATH, req.path.as_str()),
            (QUERY_SIZE, size.as_str()),
            (QUERY_ROOT, req.root.as_str()),
        ];
        if req.overwrite {
            query.push((QUERY_OVERWRITE, "1"));
        }

        debug!(path = %req.path, offset = req.offset, bytes = req.remaining(), "PUT range");

        let resp = self
            .http
            .put(self.config.upload_url())
            .query(&query)
            .header(OFFSET_HEADER, req.offset.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await?;
        decode(resp).await
    }

    async fn post_library(
        &self,
        req: &RegistrationRequest,
    ) -> Result<RegistrationResponse, UploadError> {
        let resp = self
            .http
            .post(self.config.library_url())
            .json(req)
            .send()
            .await
            .map_err(|e| UploadError::Registration(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Registration(format!(
                "library answered {}: {}",
                status.as_u16(),
                error_message(body)
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| UploadError::Registration(e.to_string()))?;
        let parsed: RegistrationResponse = serde_json::from_slice(&bytes)
            .map_err(|e| UploadError::Registration(format!("malformed response: {e}")))?;
        if !parsed.ok {
            return Err(UploadError::Registration("library rejected the entry".into()));
        }
        Ok(parsed)
    }
}

impl RemoteStore for HttpRemote {
    fn probe(&self, req: &ProbeRequest) -> BoxFuture<'_, Result<ProbeStatus, UploadError>> {
        let req = req.clone();
        Box::pin(async move { self.get_status(&req).await })
    }

    fn put_range(
        &self,
        req: &ChunkRequest,
        body: ChunkBody,
    ) -> BoxFuture<'_, Result<ChunkAck, UploadError>> {
        let req = req.clone();
        Box::pin(async move { self.send_range(&req, body).await })
    }
}

impl LibraryRegistrar for HttpRemote {
    fn register(
        &self,
        req: &RegistrationRequest,
    ) -> BoxFuture<'_, Result<RegistrationResponse, UploadError>> {
        let req = req.clone();
        Box::pin(async move { self.post_library(&req).await })
    }
}

/// Maps a store response: 409 is a conflict, any other non-2xx a remote failure.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, UploadError> {
    let status = resp.status();
    if status.as_u16() == STATUS_CONFLICT {
        let body = resp.text().await.unwrap_or_default();
        return Err(UploadError::Conflict(error_message(body)));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UploadError::Remote {
            status: status.as_u16(),
            body: error_message(body),
        });
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn error_message(body: String) -> String {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_protocol::{LibraryKind, UploadIntent};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Starts a one-shot HTTP server answering `status` with `body`.
    ///
    /// The join handle yields the raw request text.
    async fn mock_server(status: u16, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            let mut request = Vec::new();
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                loop {
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request_complete(&request) {
                        break;
                    }
                }

                let resp = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    /// Headers received and, for bodies, the terminating chunk or full length.
    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let head = text[..header_end].to_ascii_lowercase();
        let body = &text[header_end + 4..];
        if head.contains("transfer-encoding: chunked") {
            return body.ends_with("0\r\n\r\n");
        }
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    fn remote(url: String) -> HttpRemote {
        HttpRemote::new(HttpConfig::with_base_url(url)).unwrap()
    }

    #[tokio::test]
    async fn probe_sends_query_and_parses_status() {
        let (url, handle) = mock_server(200, r#"{"offset":6,"complete":false,"size":11}"#).await;

        let status = remote(url)
            .probe(&ProbeRequest {
                root: "uploads".into(),
                path: "docs/guide/intro.md".into(),
                size: 11,
                intent: UploadIntent::Resume,
            })
            .await
            .unwrap();
        assert_eq!(status.offset, 6);
        assert!(!status.complete);

        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /api/upload?"));
        assert!(request.contains("path=docs%2Fguide%2Fintro.md"));
        assert!(request.contains("size=11"));
        assert!(request.contains("intent=resume"));
    }

    #[tokio::test]
    async fn conflict_status_is_distinct() {
        let (url, handle) = mock_server(409, r#"{"error":"size mismatch"}"#).await;

        let err = remote(url)
            .probe(&ProbeRequest {
                root: "uploads".into(),
                path: "a.bin".into(),
                size: 4,
                intent: UploadIntent::Replace,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Conflict(ref msg) if msg == "size mismatch"));
        handle.abort();
    }

    #[tokio::test]
    async fn server_error_is_remote_failure() {
        let (url, handle) = mock_server(500, "boom").await;

        let err = remote(url)
            .probe(&ProbeRequest {
                root: "uploads".into(),
                path: "a.bin".into(),
                size: 4,
                intent: UploadIntent::Replace,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Remote { status: 500, .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn put_streams_range_with_offset_header() {
        let (url, handle) = mock_server(200, r#"{"ok":true,"complete":true,"offset":11,"size":11}"#).await;

        let body: ChunkBody = Box::new(std::io::Cursor::new(b"world".to_vec()));
        let ack = remote(url)
            .put_range(
                &ChunkRequest {
                    root: "uploads".into(),
                    path: "docs/resume.txt".into(),
                    size: 11,
                    offset: 6,
                    overwrite: true,
                },
                body,
            )
            .await
            .unwrap();
        assert!(ack.complete);
        assert_eq!(ack.offset, 11);

        let request = handle.await.unwrap();
        assert!(request.starts_with("PUT /api/upload?"));
        assert!(request.contains("overwrite=1"));
        assert!(request.to_ascii_lowercase().contains("x-upload-offset: 6"));
        assert!(request.contains("world"));
    }

    #[tokio::test]
    async fn registration_failure_is_registration_error() {
        let (url, handle) = mock_server(503, r#"{"error":"library offline"}"#).await;

        let err = remote(url)
            .register(&RegistrationRequest {
                path: "files/uploads/docs".into(),
                kind: Some(LibraryKind::Dir),
                label: None,
                files: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Registration(ref msg) if msg.contains("library offline")));
        handle.abort();
    }

    #[tokio::test]
    async fn registration_returns_id() {
        let (url, handle) = mock_server(200, r#"{"ok":true,"id":"abc123def456"}"#).await;

        let resp = remote(url)
            .register(&RegistrationRequest {
                path: "files/uploads/a.txt".into(),
                kind: Some(LibraryKind::File),
                label: Some("A".into()),
                files: vec![],
            })
            .await
            .unwrap();
        assert_eq!(resp.id, "abc123def456");

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /api/library"));
        assert!(request.contains(r#""kind":"file""#));
    }
}
