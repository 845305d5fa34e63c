//! Wire types for the resumable upload protocol.
//!
//! The engine speaks three requests to a content store: a side-effect free
//! status probe, a chunk `PUT` carrying the remaining byte range of one file,
//! and a library registration once every file of a job is stored.

pub mod constants;
pub mod types;

pub use types::{
    ChunkAck, ChunkRequest, Destination, ErrorBody, LibraryKind, ProbeRequest, ProbeStatus,
    RegistrationRequest, RegistrationResponse, StoredFile, UploadIntent,
};
