//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub inbox and outbox (verification and dispatch)
//! - Metrics (Prometheus)

mod inbox;
pub mod metrics;

pub use inbox::{
    ActivityHandler, ActivityType, IDENTIFIER_PLACEHOLDER, InboxActivity, InboxDispatcher, Mailbox,
    mailbox_router, mailbox_routes, route_path,
};
pub use metrics::metrics_router;
