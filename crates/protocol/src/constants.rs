/// Status probe (`GET`) and chunk transfer (`PUT`) endpoint.
pub const UPLOAD_ENDPOINT: &str = "/api/upload";

/// Content library registration endpoint.
pub const LIBRARY_ENDPOINT: &str = "/api/library";

/// Header carrying the first byte offset of a chunk body.
pub const OFFSET_HEADER: &str = "x-upload-offset";

/// Query parameter: target path relative to the destination root.
pub const QUERY_PATH: &str = "path";

/// Query parameter: declared total size of the target in bytes.
pub const QUERY_SIZE: &str = "size";

/// Query parameter: logical destination root key.
pub const QUERY_ROOT: &str = "root";

/// Query parameter: probe intent (`replace`, `resume`, `overwrite`).
pub const QUERY_INTENT: &str = "intent";

/// Query parameter set on a chunk `PUT` that may discard a conflicting object.
pub const QUERY_OVERWRITE: &str = "overwrite";

/// Root key of the general uploads area.
pub const ROOT_UPLOADS: &str = "uploads";

/// HTTP status the store answers with when a target is incompatible.
pub const STATUS_CONFLICT: u16 = 409;
