//! SQLite-backed prompt table, session table, and decision guard.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use atlasbridge_types::{
    is_legal, BridgeError, Confidence, Nonce, PromptEvent, PromptId, PromptStatus, PromptType,
    ReplySource, Session, SessionId, SessionState, Signal,
};

/// Writes that take longer than this indicate a wedged database.
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Outcome of the atomic decision guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// This call won the race; the reply is committed.
    Accepted,
    /// Another reply already decided the prompt.
    AlreadyDecided,
    /// The prompt's TTL had passed.
    Expired,
    /// The prompt exists but belongs to a different session.
    WrongSession,
    /// No such prompt.
    Unknown,
}

/// The prompt store. One open SQLite connection, WAL mode, single writer.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let conn = Connection::open(path)
            .map_err(|e| BridgeError::StoreError(format!("failed to open database: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| BridgeError::StoreError(format!("failed to set WAL mode: {e}")))?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests and the prompt lab). In-memory
    /// databases have no WAL; everything else behaves identically.
    pub fn open_in_memory() -> Result<Self, BridgeError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BridgeError::StoreError(format!("failed to open database: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, BridgeError> {
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(|e| BridgeError::StoreError(format!("failed to set busy timeout: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                tool TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                label TEXT,
                state TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);

            CREATE TABLE IF NOT EXISTS prompts (
                prompt_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(session_id),
                prompt_type TEXT NOT NULL,
                excerpt TEXT NOT NULL,
                confidence TEXT NOT NULL,
                signal TEXT NOT NULL,
                options TEXT NOT NULL DEFAULT '',
                created_at_ms INTEGER NOT NULL,
                ttl_seconds INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'created',
                nonce TEXT NOT NULL UNIQUE,
                decided_at_ms INTEGER,
                decision TEXT,
                reply_source TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_prompts_session ON prompts(session_id);
            CREATE INDEX IF NOT EXISTS idx_prompts_state ON prompts(state);",
        )
        .map_err(|e| BridgeError::StoreError(format!("failed to create schema: {e}")))?;

        Ok(Self { conn })
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Record a new active session.
    pub fn insert_session(&self, session: &Session) -> Result<(), BridgeError> {
        self.conn
            .execute(
                "INSERT INTO sessions (session_id, tool, started_at, ended_at, label, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.session_id.as_str(),
                    session.tool,
                    session.started_at.to_rfc3339(),
                    session.ended_at.map(|t| t.to_rfc3339()),
                    session.label,
                    session.state.as_str(),
                ],
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to insert session: {e}")))?;
        Ok(())
    }

    /// Mark a session ended.
    pub fn end_session(&self, session_id: &SessionId) -> Result<(), BridgeError> {
        self.conn
            .execute(
                "UPDATE sessions SET state = 'ended', ended_at = ?2 WHERE session_id = ?1",
                params![session_id.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to end session: {e}")))?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, BridgeError> {
        self.conn
            .query_row(
                "SELECT session_id, tool, started_at, ended_at, label, state
                 FROM sessions WHERE session_id = ?1",
                params![session_id.as_str()],
                row_to_session,
            )
            .optional()
            .map_err(|e| BridgeError::StoreError(format!("failed to read session: {e}")))
    }

    /// All sessions, most recent first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, BridgeError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id, tool, started_at, ended_at, label, state
                 FROM sessions ORDER BY started_at DESC LIMIT ?1",
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_session)
            .map_err(|e| BridgeError::StoreError(format!("failed to query sessions: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::StoreError(format!("failed to read session row: {e}")))
    }

    pub fn list_active_sessions(&self) -> Result<Vec<Session>, BridgeError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id, tool, started_at, ended_at, label, state
                 FROM sessions WHERE state = 'active' ORDER BY started_at DESC",
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], row_to_session)
            .map_err(|e| BridgeError::StoreError(format!("failed to query sessions: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::StoreError(format!("failed to read session row: {e}")))
    }

    // -----------------------------------------------------------------
    // Prompts
    // -----------------------------------------------------------------

    /// Insert a prompt in state `created`.
    ///
    /// Fails with a `DuplicateNonce` store error if the nonce already exists.
    pub fn insert_prompt(&self, prompt: &PromptEvent) -> Result<(), BridgeError> {
        let result = self.conn.execute(
            "INSERT INTO prompts (prompt_id, session_id, prompt_type, excerpt, confidence,
                                  signal, options, created_at_ms, ttl_seconds, state, nonce)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                prompt.prompt_id.as_str(),
                prompt.session_id.as_str(),
                prompt.prompt_type.as_str(),
                prompt.excerpt,
                prompt.confidence.as_str(),
                prompt.signal.as_str(),
                prompt.options.join("\n"),
                prompt.created_at.timestamp_millis(),
                prompt.ttl_seconds as i64,
                prompt.status.as_str(),
                prompt.nonce.as_str(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.as_deref().is_some_and(|m| m.contains("nonce")) =>
            {
                Err(BridgeError::StoreError(format!(
                    "DuplicateNonce: {}",
                    prompt.nonce
                )))
            }
            Err(e) => Err(BridgeError::StoreError(format!(
                "failed to insert prompt: {e}"
            ))),
        }
    }

    pub fn get_prompt(&self, prompt_id: &PromptId) -> Result<Option<PromptEvent>, BridgeError> {
        self.conn
            .query_row(
                "SELECT prompt_id, session_id, prompt_type, excerpt, confidence, signal,
                        options, created_at_ms, ttl_seconds, state, nonce
                 FROM prompts WHERE prompt_id = ?1",
                params![prompt_id.as_str()],
                row_to_prompt,
            )
            .optional()
            .map_err(|e| BridgeError::StoreError(format!("failed to read prompt: {e}")))
    }

    /// Atomic lifecycle transition: `UPDATE ... WHERE state = from_state`.
    ///
    /// Returns `true` if exactly one row changed. Illegal `(from, to)` pairs
    /// are rejected before touching the database.
    pub fn transition(
        &self,
        prompt_id: &PromptId,
        from: PromptStatus,
        to: PromptStatus,
    ) -> Result<bool, BridgeError> {
        if !is_legal(from, to) {
            return Err(BridgeError::IllegalTransition(format!(
                "{} -> {} for prompt {}",
                from.as_str(),
                to.as_str(),
                prompt_id
            )));
        }
        let changed = self
            .conn
            .execute(
                "UPDATE prompts SET state = ?3 WHERE prompt_id = ?1 AND state = ?2",
                params![prompt_id.as_str(), from.as_str(), to.as_str()],
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to transition prompt: {e}")))?;
        debug!(
            prompt_id = %prompt_id,
            from = from.as_str(),
            to = to.as_str(),
            changed,
            "prompt transition"
        );
        Ok(changed == 1)
    }

    /// The atomic decision guard.
    ///
    /// In one statement: commit the reply iff the prompt belongs to the
    /// session, is in `routed` or `awaiting_reply`, and its TTL has not
    /// passed at `now_millis`. Zero rows affected means the call lost; the
    /// current row is inspected to classify why.
    pub fn decide_prompt(
        &self,
        prompt_id: &PromptId,
        session_id: &SessionId,
        reply_value: &str,
        source: ReplySource,
        now_millis: i64,
    ) -> Result<CommitResult, BridgeError> {
        let changed = self
            .conn
            .execute(
                "UPDATE prompts
                 SET state = 'reply_received', decision = ?3, decided_at_ms = ?5,
                     reply_source = ?4
                 WHERE prompt_id = ?1
                   AND session_id = ?2
                   AND state IN ('routed', 'awaiting_reply')
                   AND (created_at_ms + ttl_seconds * 1000) > ?5",
                params![
                    prompt_id.as_str(),
                    session_id.as_str(),
                    reply_value,
                    source.as_str(),
                    now_millis,
                ],
            )
            .map_err(|e| BridgeError::StoreError(format!("decision guard failed: {e}")))?;

        if changed == 1 {
            return Ok(CommitResult::Accepted);
        }

        // Lost the guard; classify from the current row.
        let row: Option<(String, String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT session_id, state, created_at_ms, ttl_seconds
                 FROM prompts WHERE prompt_id = ?1",
                params![prompt_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| BridgeError::StoreError(format!("failed to inspect prompt: {e}")))?;

        let Some((owner, state, created_at_ms, ttl_seconds)) = row else {
            return Ok(CommitResult::Unknown);
        };
        if owner != session_id.as_str() {
            return Ok(CommitResult::WrongSession);
        }
        if state == "expired" || created_at_ms + ttl_seconds * 1000 <= now_millis {
            return Ok(CommitResult::Expired);
        }
        Ok(CommitResult::AlreadyDecided)
    }

    /// Prompts whose state is non-terminal and TTL has not passed.
    ///
    /// Called on daemon restart to re-attach in-flight prompts.
    pub fn load_pending(&self, now_millis: i64) -> Result<Vec<PromptEvent>, BridgeError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT prompt_id, session_id, prompt_type, excerpt, confidence, signal,
                        options, created_at_ms, ttl_seconds, state, nonce
                 FROM prompts
                 WHERE state IN ('created', 'routed', 'awaiting_reply', 'reply_received', 'injected')
                   AND (created_at_ms + ttl_seconds * 1000) > ?1
                 ORDER BY created_at_ms ASC",
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![now_millis], row_to_prompt)
            .map_err(|e| BridgeError::StoreError(format!("failed to query pending: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::StoreError(format!("failed to read prompt row: {e}")))
    }

    /// Transition every `routed`/`awaiting_reply` prompt past its TTL to
    /// `expired`, returning the affected prompt ids for audit.
    pub fn sweep_expired(&self, now_millis: i64) -> Result<Vec<PromptId>, BridgeError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT prompt_id FROM prompts
                 WHERE state IN ('routed', 'awaiting_reply')
                   AND (created_at_ms + ttl_seconds * 1000) <= ?1",
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to prepare sweep: {e}")))?;
        let ids: Vec<PromptId> = stmt
            .query_map(params![now_millis], |row| {
                row.get::<_, String>(0).map(PromptId::new)
            })
            .map_err(|e| BridgeError::StoreError(format!("failed to query sweep: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::StoreError(format!("failed to read sweep row: {e}")))?;

        if ids.is_empty() {
            return Ok(ids);
        }

        let changed = self
            .conn
            .execute(
                "UPDATE prompts SET state = 'expired'
                 WHERE state IN ('routed', 'awaiting_reply')
                   AND (created_at_ms + ttl_seconds * 1000) <= ?1",
                params![now_millis],
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to sweep: {e}")))?;
        if changed != ids.len() {
            // A decide_prompt raced in between the select and the update;
            // the guard already excluded the expired rows, so this is benign.
            warn!(selected = ids.len(), changed, "sweep count mismatch");
        }
        info!(count = changed, "expired prompts swept");
        Ok(ids)
    }

    /// Mark a prompt canceled if it is still non-terminal.
    pub fn cancel_prompt(&self, prompt_id: &PromptId) -> Result<bool, BridgeError> {
        let changed = self
            .conn
            .execute(
                "UPDATE prompts SET state = 'canceled'
                 WHERE prompt_id = ?1
                   AND state NOT IN ('resolved', 'expired', 'canceled', 'failed')",
                params![prompt_id.as_str()],
            )
            .map_err(|e| BridgeError::StoreError(format!("failed to cancel prompt: {e}")))?;
        Ok(changed == 1)
    }

    /// The committed decision for a prompt, if any. Used by restart
    /// recovery to re-enqueue replies that never reached injection.
    pub fn get_decision(
        &self,
        prompt_id: &PromptId,
    ) -> Result<Option<(String, ReplySource)>, BridgeError> {
        let row: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT decision, reply_source FROM prompts WHERE prompt_id = ?1",
                params![prompt_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| BridgeError::StoreError(format!("failed to read decision: {e}")))?;
        Ok(row.and_then(|(decision, source)| {
            let decision = decision?;
            let source = source?.parse().ok()?;
            Some((decision, source))
        }))
    }

    /// Count prompts per state for `status` reporting.
    pub fn count_by_state(&self) -> Result<Vec<(String, u64)>, BridgeError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM prompts GROUP BY state ORDER BY state")
            .map_err(|e| BridgeError::StoreError(format!("failed to prepare count: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(|e| BridgeError::StoreError(format!("failed to count: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::StoreError(format!("failed to read count row: {e}")))
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let started: String = row.get(2)?;
    let ended: Option<String> = row.get(3)?;
    let state: String = row.get(5)?;
    Ok(Session {
        session_id: SessionId::new(row.get::<_, String>(0)?),
        tool: row.get(1)?,
        started_at: parse_rfc3339(&started),
        ended_at: ended.as_deref().map(parse_rfc3339),
        label: row.get(4)?,
        state: state.parse().unwrap_or(SessionState::Ended),
    })
}

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptEvent> {
    let options: String = row.get(6)?;
    let created_at_ms: i64 = row.get(7)?;
    let prompt_type: String = row.get(2)?;
    let confidence: String = row.get(4)?;
    let signal: String = row.get(5)?;
    let state: String = row.get(9)?;
    Ok(PromptEvent {
        prompt_id: PromptId::new(row.get::<_, String>(0)?),
        session_id: SessionId::new(row.get::<_, String>(1)?),
        prompt_type: prompt_type.parse().unwrap_or(PromptType::FreeText),
        excerpt: row.get(3)?,
        confidence: confidence.parse().unwrap_or(Confidence::Low),
        signal: signal.parse().unwrap_or(Signal::Silence),
        options: if options.is_empty() {
            Vec::new()
        } else {
            options.split('\n').map(str::to_string).collect()
        },
        created_at: DateTime::from_timestamp_millis(created_at_ms).unwrap_or_else(Utc::now),
        ttl_seconds: row.get::<_, i64>(8)? as u64,
        status: state.parse().unwrap_or(PromptStatus::Failed),
        nonce: Nonce::new(row.get::<_, String>(10)?),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Cloneable, thread-safe handle to the store.
///
/// SQLite connections are `Send` but not `Sync`; the mutex serializes all
/// mutating operations across the supervisor tasks, the router, and the
/// sweeper, which is exactly the single-writer model the guard relies on.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Database>>,
}

impl StoreHandle {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, BridgeError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Database>, BridgeError> {
        self.inner
            .lock()
            .map_err(|_| BridgeError::StorageFatal("store mutex poisoned".into()))
    }

    pub fn insert_session(&self, session: &Session) -> Result<(), BridgeError> {
        self.lock()?.insert_session(session)
    }

    pub fn end_session(&self, session_id: &SessionId) -> Result<(), BridgeError> {
        self.lock()?.end_session(session_id)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, BridgeError> {
        self.lock()?.get_session(session_id)
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, BridgeError> {
        self.lock()?.list_sessions(limit)
    }

    pub fn list_active_sessions(&self) -> Result<Vec<Session>, BridgeError> {
        self.lock()?.list_active_sessions()
    }

    pub fn insert_prompt(&self, prompt: &PromptEvent) -> Result<(), BridgeError> {
        self.lock()?.insert_prompt(prompt)
    }

    pub fn get_prompt(&self, prompt_id: &PromptId) -> Result<Option<PromptEvent>, BridgeError> {
        self.lock()?.get_prompt(prompt_id)
    }

    pub fn transition(
        &self,
        prompt_id: &PromptId,
        from: PromptStatus,
        to: PromptStatus,
    ) -> Result<bool, BridgeError> {
        self.lock()?.transition(prompt_id, from, to)
    }

    pub fn decide_prompt(
        &self,
        prompt_id: &PromptId,
        session_id: &SessionId,
        reply_value: &str,
        source: ReplySource,
        now_millis: i64,
    ) -> Result<CommitResult, BridgeError> {
        self.lock()?
            .decide_prompt(prompt_id, session_id, reply_value, source, now_millis)
    }

    pub fn load_pending(&self, now_millis: i64) -> Result<Vec<PromptEvent>, BridgeError> {
        self.lock()?.load_pending(now_millis)
    }

    pub fn sweep_expired(&self, now_millis: i64) -> Result<Vec<PromptId>, BridgeError> {
        self.lock()?.sweep_expired(now_millis)
    }

    pub fn cancel_prompt(&self, prompt_id: &PromptId) -> Result<bool, BridgeError> {
        self.lock()?.cancel_prompt(prompt_id)
    }

    pub fn get_decision(
        &self,
        prompt_id: &PromptId,
    ) -> Result<Option<(String, ReplySource)>, BridgeError> {
        self.lock()?.get_decision(prompt_id)
    }

    pub fn count_by_state(&self) -> Result<Vec<(String, u64)>, BridgeError> {
        self.lock()?.count_by_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> Database {
        Database::open_in_memory().expect("open in-memory store")
    }

    fn seed_session(db: &Database) -> SessionId {
        let session = Session::start("claude", None);
        db.insert_session(&session).expect("insert session");
        session.session_id
    }

    fn seed_prompt(db: &Database, session_id: &SessionId, ttl: u64) -> PromptEvent {
        let prompt = PromptEvent::create(
            session_id.clone(),
            PromptType::YesNo,
            Confidence::High,
            Signal::Pattern,
            "Continue? [y/N]",
            ttl,
        );
        db.insert_prompt(&prompt).expect("insert prompt");
        prompt
    }

    fn route(db: &Database, prompt: &PromptEvent) {
        assert!(db
            .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
            .unwrap());
        assert!(db
            .transition(&prompt.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
            .unwrap());
    }

    #[test]
    fn insert_and_get_prompt() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        let loaded = db.get_prompt(&prompt.prompt_id).unwrap().unwrap();
        assert_eq!(loaded.prompt_id, prompt.prompt_id);
        assert_eq!(loaded.nonce, prompt.nonce);
        assert_eq!(loaded.status, PromptStatus::Created);
    }

    #[test]
    fn duplicate_nonce_rejected() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);

        let mut dup = PromptEvent::create(
            sid,
            PromptType::YesNo,
            Confidence::High,
            Signal::Pattern,
            "Again?",
            300,
        );
        dup.nonce = prompt.nonce.clone();
        let err = db.insert_prompt(&dup).unwrap_err();
        assert!(err.to_string().contains("DuplicateNonce"), "{err}");
    }

    #[test]
    fn transition_requires_from_state() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);

        assert!(db
            .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
            .unwrap());
        // Second attempt from the same state finds no matching row.
        assert!(!db
            .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
            .unwrap());
    }

    #[test]
    fn illegal_transition_rejected_before_db() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        let err = db
            .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Resolved)
            .unwrap_err();
        assert!(matches!(err, BridgeError::IllegalTransition(_)));
    }

    #[test]
    fn decide_prompt_accepts_once() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        route(&db, &prompt);

        let now = Utc::now().timestamp_millis();
        let first = db
            .decide_prompt(&prompt.prompt_id, &sid, "y", ReplySource::Human, now)
            .unwrap();
        assert_eq!(first, CommitResult::Accepted);

        let second = db
            .decide_prompt(&prompt.prompt_id, &sid, "n", ReplySource::Human, now)
            .unwrap();
        assert_eq!(second, CommitResult::AlreadyDecided);

        let row = db.get_prompt(&prompt.prompt_id).unwrap().unwrap();
        assert_eq!(row.status, PromptStatus::ReplyReceived);
    }

    #[test]
    fn decide_prompt_rejects_expired() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 30);
        route(&db, &prompt);

        let past_ttl = prompt.created_at.timestamp_millis() + 31_000;
        let result = db
            .decide_prompt(&prompt.prompt_id, &sid, "y", ReplySource::Human, past_ttl)
            .unwrap();
        assert_eq!(result, CommitResult::Expired);
    }

    #[test]
    fn decide_prompt_rejects_wrong_session() {
        let db = open_db();
        let sid = seed_session(&db);
        let other = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        route(&db, &prompt);

        let now = Utc::now().timestamp_millis();
        let result = db
            .decide_prompt(&prompt.prompt_id, &other, "y", ReplySource::Human, now)
            .unwrap();
        assert_eq!(result, CommitResult::WrongSession);
    }

    #[test]
    fn decide_prompt_unknown_prompt() {
        let db = open_db();
        let sid = seed_session(&db);
        let now = Utc::now().timestamp_millis();
        let result = db
            .decide_prompt(&PromptId::new("nope"), &sid, "y", ReplySource::Human, now)
            .unwrap();
        assert_eq!(result, CommitResult::Unknown);
    }

    #[test]
    fn decide_prompt_rejects_created_state() {
        // The guard only accepts routed/awaiting_reply.
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        let now = Utc::now().timestamp_millis();
        let result = db
            .decide_prompt(&prompt.prompt_id, &sid, "y", ReplySource::Human, now)
            .unwrap();
        assert_eq!(result, CommitResult::AlreadyDecided);
    }

    #[test]
    fn load_pending_returns_in_flight() {
        let db = open_db();
        let sid = seed_session(&db);
        let p1 = seed_prompt(&db, &sid, 300);
        let p2 = seed_prompt(&db, &sid, 300);
        route(&db, &p2);

        let now = Utc::now().timestamp_millis();
        let pending = db.load_pending(now).unwrap();
        let ids: Vec<&str> = pending.iter().map(|p| p.prompt_id.as_str()).collect();
        assert!(ids.contains(&p1.prompt_id.as_str()));
        assert!(ids.contains(&p2.prompt_id.as_str()));
    }

    #[test]
    fn load_pending_skips_expired_and_terminal() {
        let db = open_db();
        let sid = seed_session(&db);
        let short = seed_prompt(&db, &sid, 1);
        let resolved = seed_prompt(&db, &sid, 300);
        route(&db, &resolved);
        let now = Utc::now().timestamp_millis();
        db.decide_prompt(&resolved.prompt_id, &sid, "y", ReplySource::Human, now)
            .unwrap();
        db.transition(&resolved.prompt_id, PromptStatus::ReplyReceived, PromptStatus::Injected)
            .unwrap();
        db.transition(&resolved.prompt_id, PromptStatus::Injected, PromptStatus::Resolved)
            .unwrap();

        let later = short.created_at.timestamp_millis() + 2_000;
        let pending = db.load_pending(later).unwrap();
        // reply_received/injected prompts are pending, resolved ones are not
        assert!(pending.iter().all(|p| p.prompt_id != short.prompt_id));
        assert!(pending.iter().all(|p| p.prompt_id != resolved.prompt_id));
    }

    #[test]
    fn sweep_expires_overdue_prompts() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 30);
        route(&db, &prompt);

        let later = prompt.created_at.timestamp_millis() + 31_000;
        let swept = db.sweep_expired(later).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0], prompt.prompt_id);

        let row = db.get_prompt(&prompt.prompt_id).unwrap().unwrap();
        assert_eq!(row.status, PromptStatus::Expired);

        // A reply after the sweep classifies as expired.
        let result = db
            .decide_prompt(&prompt.prompt_id, &sid, "y", ReplySource::Human, later)
            .unwrap();
        assert_eq!(result, CommitResult::Expired);
    }

    #[test]
    fn sweep_leaves_fresh_prompts() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        route(&db, &prompt);
        let now = Utc::now().timestamp_millis();
        assert!(db.sweep_expired(now).unwrap().is_empty());
        let row = db.get_prompt(&prompt.prompt_id).unwrap().unwrap();
        assert_eq!(row.status, PromptStatus::AwaitingReply);
    }

    #[test]
    fn cancel_prompt_only_non_terminal() {
        let db = open_db();
        let sid = seed_session(&db);
        let prompt = seed_prompt(&db, &sid, 300);
        assert!(db.cancel_prompt(&prompt.prompt_id).unwrap());
        assert!(!db.cancel_prompt(&prompt.prompt_id).unwrap());
    }

    #[test]
    fn session_lifecycle() {
        let db = open_db();
        let sid = seed_session(&db);
        let loaded = db.get_session(&sid).unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Active);

        db.end_session(&sid).unwrap();
        let ended = db.get_session(&sid).unwrap().unwrap();
        assert_eq!(ended.state, SessionState::Ended);
        assert!(ended.ended_at.is_some());
        assert!(db.list_active_sessions().unwrap().is_empty());
    }

    #[test]
    fn multiple_choice_options_round_trip() {
        let db = open_db();
        let sid = seed_session(&db);
        let mut prompt = PromptEvent::create(
            sid,
            PromptType::MultipleChoice,
            Confidence::High,
            Signal::Pattern,
            "Pick one:",
            300,
        );
        prompt.options = vec!["Yes".into(), "No".into(), "Always".into()];
        db.insert_prompt(&prompt).unwrap();
        let loaded = db.get_prompt(&prompt.prompt_id).unwrap().unwrap();
        assert_eq!(loaded.options, prompt.options);
    }

    #[test]
    fn handle_is_cloneable_across_threads() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let session = Session::start("claude", None);
        handle.insert_session(&session).unwrap();
        let prompt = PromptEvent::create(
            session.session_id.clone(),
            PromptType::YesNo,
            Confidence::High,
            Signal::Pattern,
            "Go?",
            300,
        );
        handle.insert_prompt(&prompt).unwrap();
        handle
            .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
            .unwrap();

        let h2 = handle.clone();
        let sid = session.session_id.clone();
        let pid = prompt.prompt_id.clone();
        let t = std::thread::spawn(move || {
            let now = Utc::now().timestamp_millis();
            h2.decide_prompt(&pid, &sid, "y", ReplySource::Human, now)
                .unwrap()
        });
        assert_eq!(t.join().unwrap(), CommitResult::Accepted);
    }

    #[test]
    fn concurrent_decides_accept_exactly_once() {
        let handle = StoreHandle::open_in_memory().unwrap();
        let session = Session::start("claude", None);
        handle.insert_session(&session).unwrap();
        let prompt = PromptEvent::create(
            session.session_id.clone(),
            PromptType::YesNo,
            Confidence::High,
            Signal::Pattern,
            "Race?",
            300,
        );
        handle.insert_prompt(&prompt).unwrap();
        handle
            .transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
            .unwrap();
        handle
            .transition(&prompt.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
            .unwrap();

        let mut threads = Vec::new();
        for i in 0..8 {
            let h = handle.clone();
            let sid = session.session_id.clone();
            let pid = prompt.prompt_id.clone();
            threads.push(std::thread::spawn(move || {
                let now = Utc::now().timestamp_millis();
                h.decide_prompt(&pid, &sid, &format!("v{i}"), ReplySource::Human, now)
                    .unwrap()
            }));
        }
        let results: Vec<CommitResult> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        let accepted = results.iter().filter(|r| **r == CommitResult::Accepted).count();
        assert_eq!(accepted, 1, "exactly one decide_prompt call may win: {results:?}");
    }
}
