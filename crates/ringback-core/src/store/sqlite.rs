//! SQLite-backed `OutreachStore` with durable persistence.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    domain::{
        Channel, ConsentRecord, ConsentStatus, Contact, Direction, OutreachMessage,
        OutreachSession, ReplyEvent, ReplySignal, SessionId, SessionState, E164,
    },
    errors::Error,
    store::{OutreachStore, SessionFilter},
    Result,
};

const SESSION_COLUMNS: &str =
    "id, call_sid, e164, channel, state, meta_json, created_at, last_sent_at, followup_due_at";

/// Persistent store; one connection per operation, WAL mode.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> Result<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            e164 TEXT PRIMARY KEY,
            wa_capable INTEGER NOT NULL,
            first_name TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS consent_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            e164 TEXT NOT NULL,
            channel TEXT NOT NULL,
            status TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_consent_latest
            ON consent_records (e164, channel, created_at);

        CREATE TABLE IF NOT EXISTS outreach_sessions (
            id TEXT PRIMARY KEY,
            call_sid TEXT NOT NULL UNIQUE,
            e164 TEXT NOT NULL,
            channel TEXT NOT NULL,
            state TEXT NOT NULL,
            meta_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_sent_at INTEGER NULL,
            followup_due_at INTEGER NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_open
            ON outreach_sessions (e164, state, created_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_due
            ON outreach_sessions (state, followup_due_at);

        CREATE TABLE IF NOT EXISTS outreach_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(session_id) REFERENCES outreach_sessions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON outreach_messages (session_id, created_at);

        CREATE TABLE IF NOT EXISTS reply_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            signal TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(session_id) REFERENCES outreach_sessions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_reply_events_session
            ON reply_events (session_id, created_at);
        "#,
    )?;
    Ok(())
}

/// Raw column values; converted outside the rusqlite row closure so parse
/// failures surface as `Error::InvalidPersistedValue`.
struct SessionRow {
    id: String,
    call_sid: String,
    e164: String,
    channel: String,
    state: String,
    meta_json: String,
    created_at: i64,
    last_sent_at: Option<i64>,
    followup_due_at: Option<i64>,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            call_sid: row.get(1)?,
            e164: row.get(2)?,
            channel: row.get(3)?,
            state: row.get(4)?,
            meta_json: row.get(5)?,
            created_at: row.get(6)?,
            last_sent_at: row.get(7)?,
            followup_due_at: row.get(8)?,
        })
    }

    fn into_session(self) -> Result<OutreachSession> {
        Ok(OutreachSession {
            id: SessionId(self.id),
            call_sid: self.call_sid,
            e164: e164_from_db(&self.e164)?,
            channel: enum_from_db("channel", &self.channel)?,
            state: enum_from_db("state", &self.state)?,
            meta: serde_json::from_str(&self.meta_json)?,
            created_at: timestamp_from_db(self.created_at)?,
            last_sent_at: option_timestamp_from_db(self.last_sent_at)?,
            followup_due_at: option_timestamp_from_db(self.followup_due_at)?,
        })
    }
}

fn query_sessions(
    connection: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<OutreachSession>> {
    let mut stmt = connection.prepare(sql)?;
    let rows = stmt
        .query_map(params, SessionRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(SessionRow::into_session).collect()
}

#[async_trait]
impl OutreachStore for SqliteStore {
    async fn get_contact(&self, e164: &E164) -> Result<Option<Contact>> {
        let connection = self.open_connection()?;
        let row: Option<(bool, Option<String>)> = connection
            .query_row(
                "SELECT wa_capable, first_name FROM contacts WHERE e164 = ?1",
                params![e164.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(wa_capable, first_name)| Contact {
            e164: e164.clone(),
            wa_capable,
            first_name,
        }))
    }

    async fn upsert_contact(&self, contact: Contact) -> Result<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO contacts (e164, wa_capable, first_name) VALUES (?1, ?2, ?3)
            ON CONFLICT(e164) DO UPDATE SET
                wa_capable = excluded.wa_capable,
                first_name = excluded.first_name
            "#,
            params![contact.e164.as_str(), contact.wa_capable, contact.first_name],
        )?;
        Ok(())
    }

    async fn append_consent(&self, record: ConsentRecord) -> Result<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO consent_records (e164, channel, status, source, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.e164.as_str(),
                record.channel.as_str(),
                record.status.as_str(),
                record.source,
                timestamp_to_db(record.created_at),
            ],
        )?;
        Ok(())
    }

    async fn latest_consent(
        &self,
        e164: &E164,
        channel: Channel,
    ) -> Result<Option<ConsentStatus>> {
        let connection = self.open_connection()?;
        let status: Option<String> = connection
            .query_row(
                r#"
                SELECT status FROM consent_records
                WHERE e164 = ?1 AND channel = ?2
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
                params![e164.as_str(), channel.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        status
            .as_deref()
            .map(|s| enum_from_db("consent_status", s))
            .transpose()
    }

    async fn insert_session_if_absent(&self, session: OutreachSession) -> Result<OutreachSession> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO outreach_sessions (
                id, call_sid, e164, channel, state, meta_json,
                created_at, last_sent_at, followup_due_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(call_sid) DO NOTHING
            "#,
            params![
                session.id.0,
                session.call_sid,
                session.e164.as_str(),
                session.channel.as_str(),
                session.state.as_str(),
                serde_json::to_string(&session.meta)?,
                timestamp_to_db(session.created_at),
                option_timestamp_to_db(session.last_sent_at),
                option_timestamp_to_db(session.followup_due_at),
            ],
        )?;

        let sql = format!("SELECT {SESSION_COLUMNS} FROM outreach_sessions WHERE call_sid = ?1");
        query_sessions(&connection, &sql, &[&session.call_sid])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("session for call {}", session.call_sid)))
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<OutreachSession>> {
        let connection = self.open_connection()?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM outreach_sessions WHERE id = ?1");
        Ok(query_sessions(&connection, &sql, &[&id.0])?.into_iter().next())
    }

    async fn latest_open_session_since(
        &self,
        e164: &E164,
        since: DateTime<Utc>,
    ) -> Result<Option<OutreachSession>> {
        let connection = self.open_connection()?;
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM outreach_sessions
            WHERE e164 = ?1 AND state IN ('pending', 'sent') AND created_at > ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#
        );
        Ok(
            query_sessions(&connection, &sql, &[&e164.as_str(), &timestamp_to_db(since)])?
                .into_iter()
                .next(),
        )
    }

    async fn mark_sent(
        &self,
        id: &SessionId,
        sent_at: DateTime<Utc>,
        followup_due_at: DateTime<Utc>,
    ) -> Result<bool> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            r#"
            UPDATE outreach_sessions
            SET state = 'sent', last_sent_at = ?2, followup_due_at = ?3
            WHERE id = ?1 AND state = 'pending'
            "#,
            params![
                id.0,
                timestamp_to_db(sent_at),
                timestamp_to_db(followup_due_at)
            ],
        )?;
        Ok(changed > 0)
    }

    async fn transition(
        &self,
        id: &SessionId,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let connection = self.open_connection()?;
        // States are fixed identifiers from `as_str`, safe to inline.
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE outreach_sessions SET state = ?2 WHERE id = ?1 AND state IN ({allowed})"
        );
        let changed = connection.execute(&sql, params![id.0, to.as_str()])?;
        Ok(changed > 0)
    }

    async fn due_for_followup(&self, now: DateTime<Utc>) -> Result<Vec<OutreachSession>> {
        let connection = self.open_connection()?;
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM outreach_sessions
            WHERE state = 'sent' AND followup_due_at IS NOT NULL AND followup_due_at <= ?1
            ORDER BY followup_due_at ASC
            "#
        );
        query_sessions(&connection, &sql, &[&timestamp_to_db(now)])
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<OutreachSession>> {
        let connection = self.open_connection()?;
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM outreach_sessions
            WHERE (?1 IS NULL OR state = ?1)
              AND (?2 IS NULL OR instr(e164, ?2) > 0)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3 OFFSET ?4
            "#
        );
        let state = filter.state.map(|s| s.as_str());
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset).unwrap_or(i64::MAX);
        query_sessions(
            &connection,
            &sql,
            &[&state, &filter.e164_contains, &limit, &offset],
        )
    }

    async fn append_message(&self, message: OutreachMessage) -> Result<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO outreach_messages (session_id, direction, body, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                message.session_id.0,
                message.direction.as_str(),
                message.body,
                timestamp_to_db(message.created_at),
            ],
        )?;
        Ok(())
    }

    async fn messages_for(&self, session_id: &SessionId) -> Result<Vec<OutreachMessage>> {
        let connection = self.open_connection()?;
        let mut stmt = connection.prepare(
            r#"
            SELECT direction, body, created_at FROM outreach_messages
            WHERE session_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![session_id.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(direction, body, created_at)| {
                Ok(OutreachMessage {
                    session_id: session_id.clone(),
                    direction: enum_from_db::<Direction>("direction", &direction)?,
                    body,
                    created_at: timestamp_from_db(created_at)?,
                })
            })
            .collect()
    }

    async fn append_reply_event(&self, event: ReplyEvent) -> Result<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO reply_events (session_id, signal, created_at) VALUES (?1, ?2, ?3)",
            params![
                event.session_id.0,
                event.signal.as_str(),
                timestamp_to_db(event.created_at),
            ],
        )?;
        Ok(())
    }

    async fn reply_events_for(&self, session_id: &SessionId) -> Result<Vec<ReplyEvent>> {
        let connection = self.open_connection()?;
        let mut stmt = connection.prepare(
            r#"
            SELECT signal, created_at FROM reply_events
            WHERE session_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![session_id.0], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(signal, created_at)| {
                Ok(ReplyEvent {
                    session_id: session_id.clone(),
                    signal: enum_from_db::<ReplySignal>("signal", &signal)?,
                    created_at: timestamp_from_db(created_at)?,
                })
            })
            .collect()
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

fn option_timestamp_to_db(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(timestamp_to_db)
}

fn timestamp_from_db(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| Error::InvalidPersistedValue {
        field: "timestamp",
        value: value.to_string(),
    })
}

fn option_timestamp_from_db(value: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    value.map(timestamp_from_db).transpose()
}

fn e164_from_db(value: &str) -> Result<E164> {
    E164::parse(value).map_err(|_| Error::InvalidPersistedValue {
        field: "e164",
        value: value.to_string(),
    })
}

fn enum_from_db<T: FromStr>(field: &'static str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| Error::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}
