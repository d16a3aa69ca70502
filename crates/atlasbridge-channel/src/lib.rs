//! Messaging channel contract and transports.
//!
//! A [`Channel`] carries prompts out to a human and replies back in. The
//! core only depends on the contract: deliver with an allowlist, notify,
//! and a receiver thread that feeds [`InboundReply`] items into the
//! router's queue. Transports own their I/O, retry, and rate limiting.
//!
//! - [`channel`]: the trait plus delivery/reply types
//! - [`allowlist`]: channel-side identity checks
//! - [`backoff`]: jittered capped retry helper for transient failures
//! - [`console`]: deterministic local transport (tests, prompt lab)
//! - [`telegram`]: long-polling Telegram bot transport

pub mod allowlist;
pub mod backoff;
pub mod channel;
pub mod console;
pub mod telegram;

pub use allowlist::Allowlist;
pub use backoff::{retry_with_backoff, Backoff};
pub use channel::{CancelToken, Channel, ChannelError, DeliveryToken, InboundReply};
pub use console::ConsoleChannel;
pub use telegram::TelegramChannel;
