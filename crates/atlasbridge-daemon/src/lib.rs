//! The relay daemon: router, session registry, sweeper, and lifecycle.
//!
//! - [`router::Router`]: pairs prompts with replies; every decision goes
//!   through the store's guard, across restarts included
//! - [`sessions::SessionManager`]: live session registry with per-session
//!   injection queues
//! - [`sweeper`]: periodic TTL sweep, assist-window expiry, audit flush
//! - [`lifecycle::PidFile`]: advisory daemon lock
//! - [`service::Service`]: wires everything together for `run` and the
//!   background daemon

pub mod lifecycle;
pub mod router;
pub mod service;
pub mod sessions;
pub mod sweeper;

pub use lifecycle::PidFile;
pub use router::{Router, RouterMsg};
pub use service::Service;
pub use sessions::SessionManager;
