//! Artifact acquisition: ordered fallback downloads with chunked progress,
//! digest checks and zip extraction, plus the vendor driver catalog.

mod artifacts;
mod cancel;
mod catalog;
mod error;
mod extract;
mod hashing;
mod progress;

pub use artifacts::{
    ArchiveKind, ArtifactFetcher, DownloadSpec, EventSink, FetchEvent, FetchOutcome,
    DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT,
};
pub use cancel::{cancel_channel, cancel_requested, CancelRx};
pub use catalog::{
    default_catalog, find_installer, host_key, load_catalog, load_catalog_from,
    platform_tools_spec, platform_tools_url, Catalog, DriverPackage, DriverSource,
};
pub use error::{AttemptFailure, FetchError, NetworkError};
pub use extract::extract_zip;
pub use hashing::{digest_matches, hex_encode, sha256_file};
pub use progress::ProgressBuckets;
