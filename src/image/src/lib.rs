//! Skiff Image - pull engine and local image store
//!
//! Parses image references, expands short names against the configured
//! search registries, fetches content from registries, archives and
//! layouts, resolves manifest lists to one platform and keeps the result
//! in a content-addressed local store.

pub mod auth;
pub mod digest;
pub mod lock;
pub mod manifest;
pub mod platform;
pub mod pull;
pub mod reference;
pub mod resolve;
pub mod search;
pub mod stage;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_util;

pub use auth::{AuthFile, AuthResolver, RegistryAuth};
pub use digest::Digest;
pub use lock::StoreLock;
pub use platform::Platform;
pub use pull::{AllTagsReport, ImagePuller, PulledImage};
pub use reference::{ImageReference, Locator, Transport};
pub use resolve::{resolve_image, ResolvedImage};
pub use search::SearchRegistries;
pub use store::{ImageNames, ImageStore, RemoveOutcome, StoredImage};
pub use transport::{open_source, ImageSource, SourceContext, SourceOpener, TransportOpener};
