//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use atlasbridge::channel::{Allowlist, Channel, ConsoleChannel};
use atlasbridge::daemon::Service;
use atlasbridge::store::{Database, StoreHandle};
use atlasbridge::types::paths::DataDir;
use atlasbridge::types::{
    BridgeConfig, Confidence, PromptEvent, PromptStatus, PromptType, Session, SessionId, Signal,
};

/// A scratch data directory that cleans up on drop.
pub fn temp_data_dir() -> (TempDir, DataDir) {
    let tmp = TempDir::new().expect("should create temp dir");
    let data_dir = DataDir::at(tmp.path());
    (tmp, data_dir)
}

/// An in-memory store seeded with one active session.
pub fn seeded_store() -> (Database, Session) {
    let db = Database::open_in_memory().expect("should open in-memory store");
    let session = Session::start("claude", None);
    db.insert_session(&session).expect("should insert session");
    (db, session)
}

/// A yes/no prompt event for the given session.
pub fn yes_no_prompt(session_id: &SessionId, ttl_seconds: u64) -> PromptEvent {
    PromptEvent::create(
        session_id.clone(),
        PromptType::YesNo,
        Confidence::High,
        Signal::Pattern,
        "Continue? [y/N]",
        ttl_seconds,
    )
}

/// Walk a prompt to `awaiting_reply` the way the router does.
pub fn route_prompt(db: &Database, prompt: &PromptEvent) {
    assert!(db
        .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
        .expect("created -> routed"));
    assert!(db
        .transition(&prompt.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
        .expect("routed -> awaiting_reply"));
}

/// The same, through a shared handle.
pub fn route_prompt_via(store: &StoreHandle, prompt: &PromptEvent) {
    assert!(store
        .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
        .expect("created -> routed"));
    assert!(store
        .transition(&prompt.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
        .expect("routed -> awaiting_reply"));
}

/// A full service over a console channel in a scratch data dir.
pub fn console_service(data_dir: &DataDir) -> (Arc<ConsoleChannel>, Service) {
    console_service_with_config(data_dir, BridgeConfig::default())
}

pub fn console_service_with_config(
    data_dir: &DataDir,
    config: BridgeConfig,
) -> (Arc<ConsoleChannel>, Service) {
    let channel = Arc::new(ConsoleChannel::new());
    let allowlist = Allowlist::new(vec![atlasbridge::channel::console::CONSOLE_IDENTITY.into()]);
    let service = Service::bootstrap_with_channel(
        config,
        data_dir,
        Arc::clone(&channel) as Arc<dyn Channel>,
        allowlist,
    )
    .expect("service should bootstrap");
    (channel, service)
}
