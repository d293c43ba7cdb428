//! # Lapse Core
//!
//! A keyed time-to-live queue: entries expire a fixed time after they were
//! last pushed or refreshed, and a callback receives each expired entry
//! exactly once.
//!
//! ## Features
//!
//! - O(1) push, refresh, lookup and removal by key
//! - One lazily started background task per queue, alive only while the
//!   queue holds entries; it sleeps until the next deadline instead of polling
//! - Refreshes and removals racing with an expiry are detected, so a
//!   refreshed or removed entry never fires
//! - The expiry callback runs outside the queue lock and may call back into
//!   the queue
//!
//! ## Example
//!
//! ```rust,no_run
//! use lapse_core::{ExpiringQueue, QueueConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = QueueConfig::default().with_name("idle-connections");
//!     let idle = ExpiringQueue::with_config(
//!         config,
//!         |peer: String, conn_id: u64| println!("closing {conn_id} to {peer}"),
//!         || Duration::from_secs(90),
//!     );
//!
//!     idle.push("10.0.0.7:443".to_string(), 1);
//!
//!     // Traffic on the connection: keep it open another 90 seconds
//!     idle.refresh("10.0.0.7:443");
//!
//!     // Closed by the peer: drop it without running the callback
//!     let _ = idle.remove("10.0.0.7:443");
//! }
//! ```

mod config;
mod driver;
mod entry;
mod error;
mod list;
mod queue;

pub use config::{QueueConfig, DEFAULT_QUEUE_NAME};
pub use error::QueueError;
pub use queue::{ExpiringQueue, MAX_TTL};
