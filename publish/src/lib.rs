//! Publishing a bundle of files as a vibecodr capsule.
//!
//! [`Publisher::publish`] creates an empty capsule, uploads each file in
//! order and publishes it. Failures after the capsule exists come back as
//! [`PublishError::Incomplete`] carrying the capsule id and the confirmed
//! uploads, so [`Publisher::retry_upload`] or [`Publisher::retry_publish`]
//! can pick up where the first attempt stopped.

mod api;
mod bundle;
mod content_type;
mod error;
mod publisher;

pub use api::PlatformApi;
pub use api::UploadReceipt;
pub use bundle::BundleIssue;
pub use bundle::BundleLimits;
pub use bundle::BundleValidation;
pub use bundle::ContentClass;
pub use bundle::FileEntry;
pub use bundle::RESERVED_SEGMENTS;
pub use bundle::Visibility;
pub use bundle::check_entry;
pub use bundle::is_reserved_path;
pub use bundle::validate_bundle;
pub use content_type::content_type_for;
pub use error::PublishError;
pub use error::PublishFailure;
pub use error::PublishStep;
pub use error::Recovery;
pub use publisher::PublishOutcome;
pub use publisher::PublishRequest;
pub use publisher::Publisher;
