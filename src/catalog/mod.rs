//! Camera catalog
//!
//! Static mapping from camera endpoints to upstream sources and transcoder
//! parameters. Built once at startup and shared read-only by every session,
//! so lookups need no synchronization.

pub mod camera;
pub mod encoding;
pub mod error;
pub mod store;

pub use camera::CameraSpec;
pub use encoding::EncodingParams;
pub use error::CatalogError;
pub use store::CameraCatalog;
