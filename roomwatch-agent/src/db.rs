//! SQLite persistence for observed channels and login tokens.
//!
//! One row per channel, keyed by the service's numeric channel id. Join
//! tokens and heartbeat parameters land as columns on the same row; the
//! participant list is stored as a JSON column, capped before write. Uses
//! WAL mode so an operator can read the database while the agent runs.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use roomwatch_sdk::types::{ChannelSummary, JoinReply, RoomUser};

/// A persisted channel row.
#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub channel_id: i64,
    pub channel: String,
    pub topic: Option<String>,
    /// Alive flag; false is terminal.
    pub success: bool,
    pub joined: bool,
    /// Set by downstream review tooling, never by the agent.
    pub reviewed: bool,
    pub num_speakers: i64,
    pub num_all: i64,
    pub is_empty: Option<bool>,
    pub token: Option<String>,
    pub rtm_token: Option<String>,
    pub pubnub_token: Option<String>,
    pub pubnub_origin: Option<String>,
    pub pubnub_heartbeat_value: Option<i64>,
    pub pubnub_heartbeat_interval: Option<i64>,
    pub pubnub_enable: Option<bool>,
    pub agora_native_mute: Option<bool>,
    pub users: Vec<RoomUser>,
    pub discovered_at: String,
}

/// A persisted login token row.
#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: i64,
    pub user_id: i64,
    pub auth_token: String,
}

const CHANNEL_COLUMNS: &str = "channel_id, channel, topic, success, joined, reviewed, \
     num_speakers, num_all, is_empty, token, rtm_token, pubnub_token, pubnub_origin, \
     pubnub_heartbeat_value, pubnub_heartbeat_interval, pubnub_enable, agora_native_mute, \
     users, discovered_at";

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS channels (
                channel_id                INTEGER PRIMARY KEY,
                channel                   TEXT NOT NULL,
                topic                     TEXT,
                success                   INTEGER NOT NULL DEFAULT 1,
                joined                    INTEGER NOT NULL DEFAULT 0,
                reviewed                  INTEGER NOT NULL DEFAULT 0,
                num_speakers              INTEGER NOT NULL DEFAULT 0,
                num_all                   INTEGER NOT NULL DEFAULT 0,
                is_empty                  INTEGER,
                token                     TEXT,
                rtm_token                 TEXT,
                pubnub_token              TEXT,
                pubnub_origin             TEXT,
                pubnub_heartbeat_value    INTEGER,
                pubnub_heartbeat_interval INTEGER,
                pubnub_enable             INTEGER,
                agora_native_mute         INTEGER,
                users                     TEXT,
                discovered_at             TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_channels_success ON channels(success);

            CREATE TABLE IF NOT EXISTS tokens (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL,
                auth_token TEXT NOT NULL,
                is_alive   INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Insert a newly discovered channel. A second insert for the same id
    /// is a no-op; returns whether a row was actually created.
    pub fn insert_channel(&self, summary: &ChannelSummary) -> SqlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO channels
                 (channel_id, channel, topic, num_speakers, num_all, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                summary.channel_id,
                summary.channel,
                summary.topic,
                summary.num_speakers,
                summary.num_all,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(n > 0)
    }

    /// Refresh the listing counters of a known channel.
    pub fn update_counts(&self, channel_id: i64, num_speakers: i64, num_all: i64) -> SqlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE channels SET num_speakers = ?2, num_all = ?3 WHERE channel_id = ?1",
            params![channel_id, num_speakers, num_all],
        )?;
        Ok(())
    }

    /// Persist everything a successful join returned. The participant list
    /// is capped at `user_limit` entries before serialization.
    pub fn record_join(
        &self,
        channel_id: i64,
        reply: &JoinReply,
        user_limit: usize,
    ) -> SqlResult<()> {
        let capped = &reply.users[..reply.users.len().min(user_limit)];
        let users_json =
            serde_json::to_string(capped).unwrap_or_else(|_| "[]".to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE channels SET
                 success = 1,
                 joined = 1,
                 is_empty = ?2,
                 token = ?3,
                 rtm_token = ?4,
                 pubnub_token = ?5,
                 pubnub_origin = ?6,
                 pubnub_heartbeat_value = ?7,
                 pubnub_heartbeat_interval = ?8,
                 pubnub_enable = ?9,
                 agora_native_mute = ?10,
                 users = ?11
             WHERE channel_id = ?1",
            params![
                channel_id,
                reply.is_empty,
                reply.token,
                reply.rtm_token,
                reply.pubnub_token,
                reply.pubnub_origin,
                reply.pubnub_heartbeat_value,
                reply.pubnub_heartbeat_interval,
                reply.pubnub_enable,
                reply.agora_native_mute,
                users_json,
            ],
        )?;
        Ok(())
    }

    /// Mark a channel ended. A missing row is a no-op; returns whether a
    /// row changed, so callers can log the difference.
    pub fn mark_ended(&self, channel_id: i64) -> SqlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE channels SET success = 0 WHERE channel_id = ?1 AND success = 1",
            params![channel_id],
        )?;
        Ok(n > 0)
    }

    /// All channels still flagged alive, for rebuilding the in-memory state
    /// on startup.
    pub fn alive_channels(&self) -> SqlResult<Vec<ChannelRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE success = 1 ORDER BY channel_id"
        ))?;
        let rows = stmt
            .query_map([], row_to_channel)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Point lookup by channel id.
    pub fn channel(&self, channel_id: i64) -> SqlResult<Option<ChannelRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE channel_id = ?1"),
            params![channel_id],
            row_to_channel,
        )
        .optional()
    }

    /// The single alive login token, if any.
    pub fn active_token(&self) -> SqlResult<Option<TokenRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, auth_token FROM tokens WHERE is_alive = 1
             ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(TokenRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    auth_token: row.get(2)?,
                })
            },
        )
        .optional()
    }

    /// Activate a new login token. The previous alive row is retired in the
    /// same transaction, so at most one alive token ever exists.
    pub fn save_token(&self, user_id: i64, auth_token: &str) -> SqlResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("UPDATE tokens SET is_alive = 0 WHERE is_alive = 1", [])?;
        tx.execute(
            "INSERT INTO tokens (user_id, auth_token, is_alive, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![user_id, auth_token, Utc::now().to_rfc3339()],
        )?;
        tx.commit()
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> SqlResult<ChannelRow> {
    let users_json: Option<String> = row.get(17)?;
    let users = users_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    Ok(ChannelRow {
        channel_id: row.get(0)?,
        channel: row.get(1)?,
        topic: row.get(2)?,
        success: row.get(3)?,
        joined: row.get(4)?,
        reviewed: row.get(5)?,
        num_speakers: row.get(6)?,
        num_all: row.get(7)?,
        is_empty: row.get(8)?,
        token: row.get(9)?,
        rtm_token: row.get(10)?,
        pubnub_token: row.get(11)?,
        pubnub_origin: row.get(12)?,
        pubnub_heartbeat_value: row.get(13)?,
        pubnub_heartbeat_interval: row.get(14)?,
        pubnub_enable: row.get(15)?,
        agora_native_mute: row.get(16)?,
        users,
        discovered_at: row.get(18)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: i64, name: &str) -> ChannelSummary {
        ChannelSummary {
            channel_id: id,
            channel: name.to_string(),
            topic: None,
            num_speakers: 2,
            num_all: 10,
            extra: serde_json::Map::new(),
        }
    }

    fn join_reply(user_count: usize) -> JoinReply {
        JoinReply {
            success: true,
            token: Some("abc".to_string()),
            rtm_token: Some("rtm".to_string()),
            users: (0..user_count)
                .map(|i| RoomUser { user_id: i as i64, ..RoomUser::default() })
                .collect(),
            ..JoinReply::default()
        }
    }

    #[test]
    fn insert_is_once_only() {
        let db = Db::open_memory().unwrap();
        assert!(db.insert_channel(&summary(1001, "room-a")).unwrap());
        assert!(!db.insert_channel(&summary(1001, "room-a")).unwrap());

        let row = db.channel(1001).unwrap().unwrap();
        assert_eq!(row.channel, "room-a");
        assert!(row.success);
        assert!(!row.joined);
        assert!(!row.reviewed);
    }

    #[test]
    fn record_join_caps_user_list() {
        let db = Db::open_memory().unwrap();
        db.insert_channel(&summary(1, "room")).unwrap();
        db.record_join(1, &join_reply(600), 500).unwrap();

        let row = db.channel(1).unwrap().unwrap();
        assert!(row.joined);
        assert_eq!(row.token.as_deref(), Some("abc"));
        assert_eq!(row.users.len(), 500);
    }

    #[test]
    fn record_join_keeps_short_user_list() {
        let db = Db::open_memory().unwrap();
        db.insert_channel(&summary(1, "room")).unwrap();
        db.record_join(1, &join_reply(3), 500).unwrap();
        assert_eq!(db.channel(1).unwrap().unwrap().users.len(), 3);
    }

    #[test]
    fn mark_ended_is_idempotent_and_tolerates_missing_rows() {
        let db = Db::open_memory().unwrap();
        db.insert_channel(&summary(1, "room")).unwrap();

        assert!(db.mark_ended(1).unwrap());
        assert!(!db.mark_ended(1).unwrap());
        assert!(!db.mark_ended(999).unwrap());
        assert!(!db.channel(1).unwrap().unwrap().success);
    }

    #[test]
    fn alive_channels_excludes_ended() {
        let db = Db::open_memory().unwrap();
        db.insert_channel(&summary(1, "a")).unwrap();
        db.insert_channel(&summary(2, "b")).unwrap();
        db.mark_ended(1).unwrap();

        let alive = db.alive_channels().unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].channel_id, 2);
    }

    #[test]
    fn save_token_retires_previous() {
        let db = Db::open_memory().unwrap();
        assert!(db.active_token().unwrap().is_none());

        db.save_token(7, "tok-1").unwrap();
        db.save_token(7, "tok-2").unwrap();

        let active = db.active_token().unwrap().unwrap();
        assert_eq!(active.auth_token, "tok-2");

        let conn = db.conn.lock().unwrap();
        let alive: i64 = conn
            .query_row("SELECT COUNT(*) FROM tokens WHERE is_alive = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(alive, 1);
    }
}
