//! Bulk notification dispatcher.
//!
//! Accepts a batch of recipients, fans the work out to a bounded pool of
//! concurrent senders and tracks per-recipient and per-batch progress:
//! - `transport`: the mail delivery capability (`MailTransport`)
//! - `pool`: fixed worker pool over one bounded, non-blocking queue
//! - `registry`: concurrent task store with atomic terminal-status recording
//! - `stream`: single-subscriber live status streams
//! - `dispatcher`: the entry point tying the above together
//! - `retention`: eviction of completed tasks

pub mod config;
pub mod dispatcher;
pub mod pool;
pub mod registry;
pub mod retention;
pub mod stream;
pub mod transport;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use pool::{ShutdownOutcome, WorkerPool};
pub use registry::TaskRegistry;
pub use stream::TaskStream;
pub use transport::{LogTransport, MailTransport, ResendTransport, TransportError};
