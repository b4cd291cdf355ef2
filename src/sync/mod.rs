//! Synchronization between the two task systems.
//!
//! `inbound` reacts to webhook events from the external service, `outbound`
//! mirrors internally-initiated changes back out, `queue` decouples webhook
//! acknowledgement from processing, and `status` holds the vocabulary
//! translation both directions share. `tags` and `kpi` are read-side
//! aggregations over the external task set.

pub mod inbound;
pub mod kpi;
pub mod outbound;
pub mod queue;
pub mod status;
pub mod tags;

pub use inbound::SyncRelay;
pub use kpi::KpiBoard;
pub use outbound::OutboundSync;
pub use queue::WebhookQueue;
pub use tags::TagSync;
