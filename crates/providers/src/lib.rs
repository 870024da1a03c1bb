//! Collaborator implementations for Tabwise.
//!
//! Everything here implements a trait from `tabwise_core`. The orchestration
//! core in `tabwise-agent` only ever sees the traits.

pub mod host;
#[cfg(feature = "local")]
pub mod local;
pub mod page;
pub mod privacy;

pub use host::{HostHardware, HostTelemetry, MemInfo};
#[cfg(feature = "local")]
pub use local::{LocalEngine, TokenizerEstimator};
pub use page::{FilePageContext, NoPageContext, StaticPageContext};
pub use privacy::LocalPrivacyManager;
