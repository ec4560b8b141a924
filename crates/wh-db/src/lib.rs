//! Storage layer for the work-hour tracker.
//!
//! Persists users, projects, sessions, work blocks and per-block activity
//! counters using `rusqlite`, and implements [`ActivityStore`] for the daemon.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The daemon moves it onto a dedicated writer thread and never shares it.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with millisecond precision and a
//! `Z` suffix (e.g., `2024-01-15T10:30:00.000Z`). The fixed width keeps
//! lexicographic ordering identical to chronological ordering, which the
//! range queries and `MAX()` upserts rely on.
//!
//! ## Activity Counters
//!
//! `work_block_activity` holds one row per (block, activity type). It is only
//! ever incremented, never rewritten from a block snapshot, so replaying a
//! block save cannot double count.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use uuid::Uuid;

use wh_core::{
    ActivityStore, ActivityType, CloseAllSummary, DaySummary, ProjectSummary, Session,
    SessionId, SessionState, StoreError, UserId, WindowConfig, WorkBlock, WorkBlockId,
    WorkBlockState, WorkSummary,
};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {record_id}: {timestamp}")]
    TimestampParse {
        record_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row could not be turned back into a domain value.
    #[error("invalid record {record_id}: {message}")]
    InvalidRecord { record_id: String, message: String },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        Self::new(err)
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .finish()
    }
}

struct SessionRow {
    id: String,
    user_id: String,
    start_time: String,
    end_time: Option<String>,
    last_activity_time: String,
    activity_count: i64,
    state: String,
}

struct WorkBlockRow {
    id: String,
    session_id: String,
    project_name: String,
    project_path: String,
    start_time: String,
    end_time: Option<String>,
    last_activity_time: String,
    activity_count: i64,
    state: String,
}

const WORK_BLOCK_COLUMNS: &str = "
    wb.id, wb.session_id, p.name, p.path, wb.start_time, wb.end_time,
    wb.last_activity_time, wb.activity_count, wb.state
";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        // Readers share the file with the daemon writer.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (name, path)
            );

            -- state: active | expired | closed_by_cleanup
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                last_activity_time TEXT NOT NULL,
                activity_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_state ON sessions(user_id, state);
            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);

            -- state: active | idle | session_ended | closed_by_cleanup
            CREATE TABLE IF NOT EXISTS work_blocks (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                last_activity_time TEXT NOT NULL,
                activity_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                FOREIGN KEY (project_id) REFERENCES projects(id)
            );

            CREATE INDEX IF NOT EXISTS idx_work_blocks_session ON work_blocks(session_id);
            CREATE INDEX IF NOT EXISTS idx_work_blocks_state ON work_blocks(state);
            CREATE INDEX IF NOT EXISTS idx_work_blocks_start ON work_blocks(start_time);

            CREATE TABLE IF NOT EXISTS work_block_activity (
                work_block_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (work_block_id, activity_type),
                FOREIGN KEY (work_block_id) REFERENCES work_blocks(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    fn ensure_user(&self, user_id: &UserId, now: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO users (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![user_id.as_str(), now],
        )?;
        Ok(())
    }

    fn ensure_project(&self, name: &str, path: &str, now: &str) -> Result<String, DbError> {
        let id = project_id(name, path);
        self.conn.execute(
            "INSERT INTO projects (id, name, path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![id, name, path, now],
        )?;
        Ok(id)
    }

    /// Inserts or updates a session.
    ///
    /// Counters and `last_activity_time` never move backwards, even if an
    /// older snapshot of the session is written after a newer one.
    pub fn upsert_session(&self, session: &Session) -> Result<(), DbError> {
        let now = format_timestamp(Utc::now());
        self.ensure_user(&session.user_id, &now)?;
        self.conn.execute(
            "
            INSERT INTO sessions
            (id, user_id, start_time, end_time, last_activity_time, activity_count, state, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(id) DO UPDATE SET
                end_time = excluded.end_time,
                last_activity_time = MAX(last_activity_time, excluded.last_activity_time),
                activity_count = MAX(activity_count, excluded.activity_count),
                state = excluded.state,
                updated_at = excluded.updated_at
            ",
            params![
                session.id.as_str(),
                session.user_id.as_str(),
                format_timestamp(session.start_time),
                session.end_time.map(format_timestamp),
                format_timestamp(session.last_activity_time),
                to_sql_count(session.activity_count),
                session.state.as_str(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Inserts or updates a work block's scalar fields.
    pub fn upsert_work_block(&self, block: &WorkBlock) -> Result<(), DbError> {
        let now = format_timestamp(Utc::now());
        let project_id = self.ensure_project(&block.project_name, &block.project_path, &now)?;
        self.conn.execute(
            "
            INSERT INTO work_blocks
            (id, session_id, project_id, start_time, end_time, last_activity_time, activity_count, state, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(id) DO UPDATE SET
                end_time = excluded.end_time,
                last_activity_time = MAX(last_activity_time, excluded.last_activity_time),
                activity_count = MAX(activity_count, excluded.activity_count),
                state = excluded.state,
                updated_at = excluded.updated_at
            ",
            params![
                block.id.as_str(),
                block.session_id.as_str(),
                project_id,
                format_timestamp(block.start_time),
                block.end_time.map(format_timestamp),
                format_timestamp(block.last_activity_time),
                to_sql_count(block.activity_count),
                block.state.as_str(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Adds one to the counter for (`work_block_id`, `activity_type`).
    pub fn increment_activity(
        &self,
        work_block_id: &WorkBlockId,
        activity_type: &ActivityType,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO work_block_activity (work_block_id, activity_type, count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(work_block_id, activity_type) DO UPDATE SET count = count + 1",
            params![work_block_id.as_str(), activity_type.as_str()],
        )?;
        Ok(())
    }

    /// Fetches one session by ID.
    pub fn get_session(&self, id: &SessionId) -> Result<Option<Session>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, user_id, start_time, end_time, last_activity_time, activity_count, state
                 FROM sessions WHERE id = ?1",
                params![id.as_str()],
                session_row,
            )
            .optional()?;
        row.map(Session::try_from).transpose()
    }

    /// Lists active sessions for a user, oldest first.
    pub fn active_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, start_time, end_time, last_activity_time, activity_count, state
             FROM sessions
             WHERE user_id = ?1 AND state = 'active'
             ORDER BY start_time ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![user_id.as_str()], session_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(Session::try_from(row?)?);
        }
        Ok(sessions)
    }

    /// Lists sessions that started inside `[start, end)`.
    pub fn sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, start_time, end_time, last_activity_time, activity_count, state
             FROM sessions
             WHERE start_time >= ?1 AND start_time < ?2
             ORDER BY start_time ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end)],
            session_row,
        )?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(Session::try_from(row?)?);
        }
        Ok(sessions)
    }

    /// Lists work blocks of a session with their histograms, oldest first.
    pub fn session_work_blocks(&self, session_id: &SessionId) -> Result<Vec<WorkBlock>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {WORK_BLOCK_COLUMNS}
             FROM work_blocks wb JOIN projects p ON p.id = wb.project_id
             WHERE wb.session_id = ?1
             ORDER BY wb.start_time ASC, wb.id ASC"
        ))?;
        let rows = stmt.query_map(params![session_id.as_str()], work_block_row)?;
        self.hydrate_blocks(rows)
    }

    /// Lists work blocks that started inside `[start, end)`.
    pub fn work_blocks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WorkBlock>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {WORK_BLOCK_COLUMNS}
             FROM work_blocks wb JOIN projects p ON p.id = wb.project_id
             WHERE wb.start_time >= ?1 AND wb.start_time < ?2
             ORDER BY wb.start_time ASC, wb.id ASC"
        ))?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end)],
            work_block_row,
        )?;
        self.hydrate_blocks(rows)
    }

    fn hydrate_blocks(
        &self,
        rows: impl Iterator<Item = rusqlite::Result<WorkBlockRow>>,
    ) -> Result<Vec<WorkBlock>, DbError> {
        let mut blocks = Vec::new();
        for row in rows {
            let mut block = WorkBlock::try_from(row?)?;
            block.activity_histogram = self.histogram(&block.id)?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn histogram(&self, id: &WorkBlockId) -> Result<BTreeMap<ActivityType, u64>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT activity_type, count FROM work_block_activity
             WHERE work_block_id = ?1 ORDER BY activity_type",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut histogram = BTreeMap::new();
        for row in rows {
            let (label, count) = row?;
            let activity_type: ActivityType =
                label.parse().map_err(|err: wh_core::ValidationError| {
                    DbError::InvalidRecord {
                        record_id: id.to_string(),
                        message: err.to_string(),
                    }
                })?;
            *histogram.entry(activity_type).or_insert(0) += from_sql_count(count);
        }
        Ok(histogram)
    }

    /// Closes active blocks with the idle rule, marking them `state`.
    ///
    /// Each end is capped at the earlier of `now` and the owning session's
    /// window end. With `session_id` set, only that session's blocks close.
    fn close_active_blocks(
        conn: &Connection,
        session_id: Option<&str>,
        now: DateTime<Utc>,
        config: &WindowConfig,
        state: WorkBlockState,
    ) -> Result<usize, DbError> {
        let active: Vec<(String, String, Option<String>)> = {
            let mut stmt = conn.prepare(
                "SELECT b.id, b.last_activity_time, s.start_time
                 FROM work_blocks b LEFT JOIN sessions s ON s.id = b.session_id
                 WHERE b.state = 'active' AND (?1 IS NULL OR b.session_id = ?1)",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let updated_at = format_timestamp(now);
        for (id, last, session_start) in &active {
            let last = parse_timestamp(last, id)?;
            let cap = match session_start {
                Some(start) => now.min(config.session_end(parse_timestamp(start, id)?)),
                None => now,
            };
            let end = config.idle_close_time(last, cap);
            conn.execute(
                "UPDATE work_blocks SET end_time = ?1, state = ?2, updated_at = ?3 WHERE id = ?4",
                params![format_timestamp(end), state.as_str(), updated_at, id],
            )?;
        }
        Ok(active.len())
    }

    /// Marks every active block idle. Run at startup, before any block is
    /// live again.
    fn finalize_orphans(&self, now: DateTime<Utc>, config: &WindowConfig) -> Result<usize, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let finalized = Self::close_active_blocks(&tx, None, now, config, WorkBlockState::Idle)?;
        tx.commit()?;
        Ok(finalized)
    }

    /// Closes every active session and block, the same way the live
    /// registry does.
    fn close_active(
        &self,
        now: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Result<CloseAllSummary, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let active: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, start_time, last_activity_time FROM sessions WHERE state = 'active'",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        let updated_at = format_timestamp(now);
        let mut summary = CloseAllSummary::default();
        for (id, start, last) in &active {
            let window_end = config.session_end(parse_timestamp(start, id)?);
            let last = parse_timestamp(last, id)?;
            let (end, session_state, block_state) = if window_end < now {
                (window_end, SessionState::Expired, WorkBlockState::SessionEnded)
            } else {
                (
                    now.max(last).min(window_end),
                    SessionState::ClosedByCleanup,
                    WorkBlockState::ClosedByCleanup,
                )
            };
            summary.work_blocks_closed +=
                Self::close_active_blocks(&tx, Some(id.as_str()), now, config, block_state)?;
            tx.execute(
                "UPDATE sessions SET end_time = ?1, state = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    format_timestamp(end),
                    session_state.as_str(),
                    updated_at,
                    id
                ],
            )?;
            summary.sessions_closed += 1;
        }
        // Blocks whose session was already closed.
        summary.work_blocks_closed +=
            Self::close_active_blocks(&tx, None, now, config, WorkBlockState::ClosedByCleanup)?;
        tx.commit()?;
        Ok(summary)
    }

    /// Aggregates work blocks that started inside `[start, end)`.
    ///
    /// Blocks with negative or implausibly long durations are counted in
    /// `excluded_work_blocks` and contribute nothing else.
    pub fn summarize(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WorkSummary, DbError> {
        let blocks = self.work_blocks_in_range(start, end)?;
        let session_count = self.sessions_in_range(start, end)?.len();

        let mut summary = WorkSummary {
            start,
            end,
            session_count: session_count as u64,
            ..WorkSummary::default()
        };
        let mut projects: HashMap<(String, String), ProjectSummary> = HashMap::new();
        let mut days: BTreeMap<chrono::NaiveDate, DaySummary> = BTreeMap::new();

        for block in &blocks {
            let Some(duration) = block.plausible_duration() else {
                tracing::debug!(block_id = %block.id, "excluding implausible work block from summary");
                summary.excluded_work_blocks += 1;
                continue;
            };
            let seconds = duration.num_seconds();
            summary.total_work_seconds += seconds;
            summary.work_block_count += 1;

            let project = projects
                .entry((block.project_name.clone(), block.project_path.clone()))
                .or_insert_with(|| ProjectSummary {
                    project_name: block.project_name.clone(),
                    project_path: block.project_path.clone(),
                    work_seconds: 0,
                    work_blocks: 0,
                    activity_count: 0,
                });
            project.work_seconds += seconds;
            project.work_blocks += 1;
            project.activity_count += block.activity_count;

            let date = block.start_time.date_naive();
            let day = days.entry(date).or_insert_with(|| DaySummary {
                date,
                work_seconds: 0,
                work_blocks: 0,
            });
            day.work_seconds += seconds;
            day.work_blocks += 1;

            for (activity_type, count) in &block.activity_histogram {
                *summary
                    .activity_histogram
                    .entry(activity_type.to_string())
                    .or_insert(0) += count;
            }
        }

        let mut projects: Vec<ProjectSummary> = projects.into_values().collect();
        projects.sort_by(|a, b| {
            b.work_seconds
                .cmp(&a.work_seconds)
                .then_with(|| a.project_name.cmp(&b.project_name))
        });
        summary.projects = projects;
        summary.days = days.into_values().collect();
        Ok(summary)
    }
}

impl ActivityStore for Database {
    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        Ok(self.upsert_session(session)?)
    }

    fn save_work_block(&self, block: &WorkBlock) -> Result<(), StoreError> {
        Ok(self.upsert_work_block(block)?)
    }

    fn increment_activity_counter(
        &self,
        work_block_id: &WorkBlockId,
        activity_type: &ActivityType,
    ) -> Result<(), StoreError> {
        Ok(self.increment_activity(work_block_id, activity_type)?)
    }

    fn load_active_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, StoreError> {
        Ok(self.active_sessions(user_id)?)
    }

    fn work_blocks_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<WorkBlock>, StoreError> {
        Ok(self.session_work_blocks(session_id)?)
    }

    fn close_all_active(
        &self,
        now: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Result<CloseAllSummary, StoreError> {
        Ok(self.close_active(now, config)?)
    }

    fn finalize_orphaned_work_blocks(
        &self,
        now: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Result<usize, StoreError> {
        Ok(self.finalize_orphans(now, config)?)
    }

    fn work_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WorkSummary, StoreError> {
        Ok(self.summarize(start, end)?)
    }
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        last_activity_time: row.get(4)?,
        activity_count: row.get(5)?,
        state: row.get(6)?,
    })
}

fn work_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkBlockRow> {
    Ok(WorkBlockRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project_name: row.get(2)?,
        project_path: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        last_activity_time: row.get(6)?,
        activity_count: row.get(7)?,
        state: row.get(8)?,
    })
}

fn invalid(record_id: &str) -> impl Fn(wh_core::ValidationError) -> DbError + '_ {
    move |err| DbError::InvalidRecord {
        record_id: record_id.to_string(),
        message: err.to_string(),
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = DbError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let id = &row.id;
        Ok(Self {
            id: SessionId::new(id.clone()).map_err(invalid(id))?,
            user_id: UserId::new(row.user_id.clone()).map_err(invalid(id))?,
            start_time: parse_timestamp(&row.start_time, id)?,
            end_time: row
                .end_time
                .as_deref()
                .map(|ts| parse_timestamp(ts, id))
                .transpose()?,
            last_activity_time: parse_timestamp(&row.last_activity_time, id)?,
            activity_count: from_sql_count(row.activity_count),
            state: row.state.parse().map_err(invalid(id))?,
        })
    }
}

impl TryFrom<WorkBlockRow> for WorkBlock {
    type Error = DbError;

    fn try_from(row: WorkBlockRow) -> Result<Self, Self::Error> {
        let id = &row.id;
        Ok(Self {
            id: WorkBlockId::new(id.clone()).map_err(invalid(id))?,
            session_id: SessionId::new(row.session_id.clone()).map_err(invalid(id))?,
            project_name: row.project_name.clone(),
            project_path: row.project_path.clone(),
            start_time: parse_timestamp(&row.start_time, id)?,
            end_time: row
                .end_time
                .as_deref()
                .map(|ts| parse_timestamp(ts, id))
                .transpose()?,
            last_activity_time: parse_timestamp(&row.last_activity_time, id)?,
            activity_count: from_sql_count(row.activity_count),
            activity_histogram: BTreeMap::new(),
            state: row.state.parse().map_err(invalid(id))?,
        })
    }
}

fn project_id(name: &str, path: &str) -> String {
    let content = format!("project|{name}|{path}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string()
}

fn parse_timestamp(timestamp: &str, record_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            record_id: record_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_sql_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_sql_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}
