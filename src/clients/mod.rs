//! HTTP clients for the two systems the bridge talks to.
//!
//! Each side is a trait so the sync layer can be exercised against
//! in-memory fakes; the `Http*` implementations are thin reqwest wrappers
//! with fixed timeouts.

mod external;
mod internal;

pub use external::{ExternalApi, HttpExternalApi};
pub use internal::{HttpInternalApi, InternalApi};
