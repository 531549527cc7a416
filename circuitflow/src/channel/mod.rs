//! Message passing to and from the isolated engine context.
//!
//! The engine runs on a dedicated thread. Requests are fire-and-forget;
//! responses arrive on subscriptions routed by operation kind. The channel
//! does not correlate responses to requests beyond echoing the request id;
//! deciding whether a response is still wanted is the subscriber's job.

mod subscription;
mod worker;

pub use subscription::Subscription;
pub use worker::{EngineFactory, WorkerChannel, WorkerOptions};
