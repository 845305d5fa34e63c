//! Remote content store and library registrar seams.
//!
//! The engine only talks to these traits. `HttpRemote` implements them over
//! the wire; `LocalStore` and `Library` implement them in-process.

use ferry_protocol::{
    ChunkAck, ChunkRequest, ProbeRequest, ProbeStatus, RegistrationRequest, RegistrationResponse,
};
use ferry_store::{Library, LocalStore};
use futures_util::future::BoxFuture;
use tokio::io::AsyncRead;

use crate::error::UploadError;

/// Byte stream carrying `[offset, size)` of one source file.
pub type ChunkBody = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Where uploaded bytes go.
pub trait RemoteStore: Send + Sync {
    /// Asks how many bytes of the target are already stored. Side-effect free.
    fn probe(&self, req: &ProbeRequest) -> BoxFuture<'_, Result<ProbeStatus, UploadError>>;

    /// Sends the remaining range of one file in a single request.
    fn put_range(
        &self,
        req: &ChunkRequest,
        body: ChunkBody,
    ) -> BoxFuture<'_, Result<ChunkAck, UploadError>>;
}

/// Accepts a finalized job into the content library.
pub trait LibraryRegistrar: Send + Sync {
    fn register(
        &self,
        req: &RegistrationRequest,
    ) -> BoxFuture<'_, Result<RegistrationResponse, UploadError>>;
}

impl RemoteStore for LocalStore {
    fn probe(&self, req: &ProbeRequest) -> BoxFuture<'_, Result<ProbeStatus, UploadError>> {
        let req = req.clone();
        Box::pin(async move { Ok(LocalStore::probe(self, &req).await?) })
    }

    fn put_range(
        &self,
        req: &ChunkRequest,
        mut body: ChunkBody,
    ) -> BoxFuture<'_, Result<ChunkAck, UploadError>> {
        let req = req.clone();
        Box::pin(async move { Ok(self.put(&req, &mut body).await?) })
    }
}

impl LibraryRegistrar for Library {
    fn register(
        &self,
        req: &RegistrationRequest,
    ) -> BoxFuture<'_, Result<RegistrationResponse, UploadError>> {
        let req = req.clone();
        Box::pin(async move {
            Library::register(self, &req)
                .await
                .map_err(|e| UploadError::Registration(e.to_string()))
        })
    }
}
