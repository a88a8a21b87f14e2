//! SQLite persistence for users, rooms, messages and lounge control.
//!
//! ## Design
//! - One `rusqlite::Connection` behind a `std::sync::Mutex`; every call is a
//!   short statement, so async callers lock it inline.
//! - Messages carry a monotonically increasing `seq` so room history is
//!   ordered even when two rows share a millisecond.
//! - `conversation_control` is a singleton row (`id = 1`) holding the lounge
//!   state; writes are last-write-wins.
//! - Opening a store applies the schema and seeds it. Seeding is idempotent.

use rand::seq::SliceRandom;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::agents::AgentId;
use crate::error::{ChatError, Result};
use crate::now_ms;

pub const GENERAL_ROOM_NAME: &str = "General";
pub const LOUNGE_ROOM_NAME: &str = "IA Lounge";
pub const SYSTEM_USERNAME: &str = "SISTEMA";
pub const DEFAULT_TOPIC: &str = "El futuro de la inteligencia artificial y su impacto en la humanidad";
pub const MAX_USERNAME_CHARS: usize = 24;
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Terminal palette for human avatars.
pub const AVATAR_COLORS: &[&str] = &["#00ff00", "#00ffff", "#ffff00", "#ff00ff", "#ff6600"];

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name  TEXT NOT NULL,
    avatar_color  TEXT NOT NULL,
    is_online     INTEGER NOT NULL DEFAULT 0,
    is_admin      INTEGER NOT NULL DEFAULT 0,
    is_ai         INTEGER NOT NULL DEFAULT 0,
    last_seen_ms  INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rooms (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    description   TEXT,
    is_general    INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,
    room_id       TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    user_id       TEXT NOT NULL REFERENCES users(id),
    body          TEXT NOT NULL,
    kind          TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_room_seq ON messages(room_id, seq);

CREATE TABLE IF NOT EXISTS conversation_control (
    id                     INTEGER PRIMARY KEY CHECK (id = 1),
    is_active              INTEGER NOT NULL DEFAULT 0,
    current_topic          TEXT NOT NULL,
    speed                  INTEGER NOT NULL DEFAULT 2,
    neo_enabled            INTEGER NOT NULL DEFAULT 1,
    latamara_enabled       INTEGER NOT NULL DEFAULT 1,
    barrilinter_enabled    INTEGER NOT NULL DEFAULT 1,
    laconchita_enabled     INTEGER NOT NULL DEFAULT 1,
    marktukemberg_enabled  INTEGER NOT NULL DEFAULT 1,
    robertthecoach_enabled INTEGER NOT NULL DEFAULT 1,
    last_speaker           TEXT,
    updated_at_ms          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS topics (
    id             TEXT PRIMARY KEY,
    title          TEXT NOT NULL,
    description    TEXT,
    initial_prompt TEXT NOT NULL,
    category       TEXT NOT NULL,
    leader_agent   TEXT,
    is_active      INTEGER NOT NULL DEFAULT 1,
    created_at_ms  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_log (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    session_start_ms INTEGER NOT NULL,
    topic_used       TEXT NOT NULL,
    participants     TEXT NOT NULL,
    started_by       TEXT
);
";

/// (title, category, initial prompt)
const SEED_TOPICS: &[(&str, &str, &str)] = &[
    (
        "Inteligencia artificial",
        "tecnología",
        "El futuro de la inteligencia artificial y su impacto en la humanidad",
    ),
    (
        "El sentido de la vida",
        "filosofía",
        "¿Cuál es el sentido de la vida y cómo se encuentra?",
    ),
    (
        "La cocina de la abuela",
        "cultura",
        "¿Qué plato tradicional no debería perderse nunca y por qué?",
    ),
    (
        "Redes sociales",
        "sociedad",
        "¿Las redes sociales nos acercan o nos alejan como sociedad?",
    ),
    (
        "Viajes en el tiempo",
        "ciencia",
        "Si pudieras viajar en el tiempo, ¿a qué época irías y qué cambiarías?",
    ),
];

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_color: String,
    pub is_online: bool,
    pub is_admin: bool,
    pub is_ai: bool,
    pub last_seen_ms: i64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_general: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Ai,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Ai => "ai",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageKind::User),
            "ai" => Some(MessageKind::Ai),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// A message joined with its author.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub seq: i64,
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub avatar_color: String,
    pub body: String,
    pub kind: MessageKind,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationStatus {
    pub is_active: bool,
    pub current_topic: String,
    /// 1 slow, 2 normal, 3 fast.
    pub speed: u8,
    pub enabled: BTreeMap<AgentId, bool>,
    pub last_speaker: Option<AgentId>,
}

impl ConversationStatus {
    pub fn is_enabled(&self, agent: AgentId) -> bool {
        self.enabled.get(&agent).copied().unwrap_or(false)
    }
}

/// Partial update of the lounge control row. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub is_active: Option<bool>,
    pub current_topic: Option<String>,
    pub speed: Option<u8>,
    pub enabled: BTreeMap<AgentId, bool>,
}

impl StatusPatch {
    pub fn is_empty(&self) -> bool {
        self.is_active.is_none()
            && self.current_topic.is_none()
            && self.speed.is_none()
            && self.enabled.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub initial_prompt: String,
    pub category: String,
    pub leader_agent: Option<AgentId>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTopic {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub initial_prompt: String,
    #[serde(default)]
    pub leader_agent: Option<AgentId>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionLog {
    pub session_start_ms: i64,
    pub topic_used: String,
    pub participants: Vec<String>,
    pub started_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str =
    "id, username, display_name, avatar_color, is_online, is_admin, is_ai, last_seen_ms, created_at_ms";

const MESSAGE_SELECT: &str = "
SELECT m.seq, m.id, m.room_id, m.user_id, u.username, u.avatar_color, m.body, m.kind, m.created_at_ms
FROM messages m JOIN users u ON u.id = m.user_id";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_color: row.get(3)?,
        is_online: row.get(4)?,
        is_admin: row.get(5)?,
        is_ai: row.get(6)?,
        last_seen_ms: row.get(7)?,
        created_at_ms: row.get(8)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_general: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(7)?;
    Ok(Message {
        seq: row.get(0)?,
        id: row.get(1)?,
        room_id: row.get(2)?,
        user_id: row.get(3)?,
        username: row.get(4)?,
        avatar_color: row.get(5)?,
        body: row.get(6)?,
        kind: MessageKind::parse(&kind).unwrap_or(MessageKind::User),
        created_at_ms: row.get(8)?,
    })
}

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    let leader: Option<String> = row.get(5)?;
    Ok(Topic {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        initial_prompt: row.get(3)?,
        category: row.get(4)?,
        leader_agent: leader.as_deref().and_then(AgentId::from_handle),
        is_active: row.get(6)?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`. `:memory:` is accepted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let store = Store { conn: Mutex::new(conn) };
        store.seed()?;
        Ok(store)
    }

    fn with<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| ChatError::LockPoisoned)?;
        f(&guard).map_err(ChatError::from)
    }

    fn seed(&self) -> Result<()> {
        let now = now_ms();
        self.with(|c| {
            c.execute(
                "INSERT OR IGNORE INTO rooms (id, name, description, is_general, created_at_ms)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![uuid::Uuid::new_v4().to_string(), GENERAL_ROOM_NAME, "Sala general", now],
            )?;
            c.execute(
                "INSERT OR IGNORE INTO rooms (id, name, description, is_general, created_at_ms)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    LOUNGE_ROOM_NAME,
                    "Las IAs conversan entre ellas",
                    now
                ],
            )?;

            for agent in AgentId::all() {
                c.execute(
                    "INSERT OR IGNORE INTO users
                     (id, username, display_name, avatar_color, is_online, is_admin, is_ai, last_seen_ms, created_at_ms)
                     VALUES (?1, ?2, ?2, ?3, 1, 0, 1, ?4, ?4)",
                    params![uuid::Uuid::new_v4().to_string(), agent.handle(), agent.agent().color, now],
                )?;
            }
            c.execute(
                "INSERT OR IGNORE INTO users
                 (id, username, display_name, avatar_color, is_online, is_admin, is_ai, last_seen_ms, created_at_ms)
                 VALUES (?1, ?2, ?2, '#808080', 0, 0, 1, ?3, ?3)",
                params![uuid::Uuid::new_v4().to_string(), SYSTEM_USERNAME, now],
            )?;

            c.execute(
                "INSERT OR IGNORE INTO conversation_control (id, current_topic, updated_at_ms)
                 VALUES (1, ?1, ?2)",
                params![DEFAULT_TOPIC, now],
            )?;

            let topic_count: i64 = c.query_row("SELECT COUNT(*) FROM topics", [], |r| r.get(0))?;
            if topic_count == 0 {
                for (title, category, prompt) in SEED_TOPICS {
                    c.execute(
                        "INSERT INTO topics (id, title, description, initial_prompt, category, leader_agent, is_active, created_at_ms)
                         VALUES (?1, ?2, NULL, ?3, ?4, NULL, 1, ?5)",
                        params![uuid::Uuid::new_v4().to_string(), title, prompt, category, now],
                    )?;
                }
            }
            Ok(())
        })
    }

    // -- Users ---------------------------------------------------------------

    /// Fetch or create `username` and mark it online.
    ///
    /// Bot handles and the system account are reserved.
    pub fn login(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::BadRequest("username required".into()));
        }
        if username.chars().count() > MAX_USERNAME_CHARS {
            return Err(ChatError::BadRequest(format!(
                "username longer than {} characters",
                MAX_USERNAME_CHARS
            )));
        }
        if is_reserved_username(username) {
            return Err(ChatError::BadRequest(format!("'{}' is reserved", username)));
        }

        let now = now_ms();
        let color = AVATAR_COLORS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(AVATAR_COLORS[0]);

        self.with(|c| {
            let updated = c.execute(
                "UPDATE users SET is_online = 1, last_seen_ms = ?2 WHERE username = ?1 AND is_ai = 0",
                params![username, now],
            )?;
            if updated == 0 {
                c.execute(
                    "INSERT INTO users
                     (id, username, display_name, avatar_color, is_online, is_admin, is_ai, last_seen_ms, created_at_ms)
                     VALUES (?1, ?2, ?2, ?3, 1, 0, 0, ?4, ?4)",
                    params![uuid::Uuid::new_v4().to_string(), username, color, now],
                )?;
            }
            c.query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
                user_from_row,
            )
        })
    }

    pub fn user(&self, user_id: &str) -> Result<User> {
        self.with(|c| {
            c.query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id],
                user_from_row,
            )
            .optional()
        })?
        .ok_or_else(|| ChatError::NotFound(format!("user '{}'", user_id)))
    }

    pub fn user_by_name(&self, username: &str) -> Result<User> {
        self.with(|c| {
            c.query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username.trim()],
                user_from_row,
            )
            .optional()
        })?
        .ok_or_else(|| ChatError::NotFound(format!("user '{}'", username)))
    }

    /// User row of a bot.
    pub fn agent_user(&self, agent: AgentId) -> Result<User> {
        self.user_by_name(agent.handle())
    }

    pub fn system_user(&self) -> Result<User> {
        self.user_by_name(SYSTEM_USERNAME)
    }

    /// Refresh `last_seen_ms` and keep the user online.
    pub fn heartbeat(&self, user_id: &str) -> Result<()> {
        let now = now_ms();
        let n = self.with(|c| {
            c.execute(
                "UPDATE users SET is_online = 1, last_seen_ms = ?2 WHERE id = ?1",
                params![user_id, now],
            )
        })?;
        if n == 0 {
            return Err(ChatError::NotFound(format!("user '{}'", user_id)));
        }
        Ok(())
    }

    /// Mark a human user offline. Bots stay online.
    pub fn mark_offline(&self, user_id: &str) -> Result<User> {
        let now = now_ms();
        self.with(|c| {
            c.execute(
                "UPDATE users SET is_online = 0, last_seen_ms = ?2 WHERE id = ?1 AND is_ai = 0",
                params![user_id, now],
            )
        })?;
        self.user(user_id)
    }

    /// Online users, bots included, by name.
    pub fn online_users(&self) -> Result<Vec<User>> {
        self.with(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {} FROM users WHERE is_online = 1 ORDER BY username COLLATE NOCASE",
                USER_COLUMNS
            ))?;
            let rows = stmt.query_map([], user_from_row)?;
            rows.collect()
        })
    }

    /// Mark offline every human idle for longer than `max_idle_ms`.
    pub fn cleanup_inactive(&self, max_idle_ms: i64) -> Result<Vec<User>> {
        self.cleanup_inactive_at(now_ms(), max_idle_ms)
    }

    /// [`Store::cleanup_inactive`] against an explicit clock reading.
    pub fn cleanup_inactive_at(&self, now: i64, max_idle_ms: i64) -> Result<Vec<User>> {
        let cutoff = now - max_idle_ms;
        self.with(|c| {
            let stale: Vec<User> = {
                let mut stmt = c.prepare(&format!(
                    "SELECT {} FROM users WHERE is_online = 1 AND is_ai = 0 AND last_seen_ms < ?1",
                    USER_COLUMNS
                ))?;
                let rows = stmt.query_map(params![cutoff], user_from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            for u in &stale {
                c.execute("UPDATE users SET is_online = 0 WHERE id = ?1", params![u.id])?;
            }
            Ok(stale
                .into_iter()
                .map(|u| User { is_online: false, ..u })
                .collect())
        })
    }

    /// Grant or revoke admin rights by username.
    pub fn set_admin(&self, username: &str, is_admin: bool) -> Result<()> {
        let n = self.with(|c| {
            c.execute(
                "UPDATE users SET is_admin = ?2 WHERE username = ?1",
                params![username.trim(), is_admin],
            )
        })?;
        if n == 0 {
            return Err(ChatError::NotFound(format!("user '{}'", username)));
        }
        Ok(())
    }

    /// Promote `username` at startup, creating it offline if it has never
    /// logged in. Bot and system accounts are refused.
    pub fn grant_admin(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if is_reserved_username(username) {
            return Err(ChatError::BadRequest(format!("'{}' is reserved", username)));
        }
        let user = match self.user_by_name(username) {
            Ok(user) => user,
            Err(ChatError::NotFound(_)) => {
                let user = self.login(username)?;
                self.mark_offline(&user.id)?
            }
            Err(err) => return Err(err),
        };
        self.set_admin(&user.username, true)?;
        self.user(&user.id)
    }

    /// Unknown users are not admins.
    pub fn is_admin(&self, user_id: &str) -> Result<bool> {
        let flag: Option<bool> = self.with(|c| {
            c.query_row("SELECT is_admin FROM users WHERE id = ?1", params![user_id], |r| r.get(0))
                .optional()
        })?;
        Ok(flag.unwrap_or(false))
    }

    // -- Rooms ---------------------------------------------------------------

    pub fn rooms(&self) -> Result<Vec<Room>> {
        self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, name, description, is_general, created_at_ms FROM rooms
                 ORDER BY is_general DESC, name",
            )?;
            let rows = stmt.query_map([], room_from_row)?;
            rows.collect()
        })
    }

    pub fn room(&self, room_id: &str) -> Result<Room> {
        self.with(|c| {
            c.query_row(
                "SELECT id, name, description, is_general, created_at_ms FROM rooms WHERE id = ?1",
                params![room_id],
                room_from_row,
            )
            .optional()
        })?
        .ok_or_else(|| ChatError::NotFound(format!("room '{}'", room_id)))
    }

    fn room_by_name(&self, name: &str) -> Result<Room> {
        self.with(|c| {
            c.query_row(
                "SELECT id, name, description, is_general, created_at_ms FROM rooms WHERE name = ?1",
                params![name],
                room_from_row,
            )
            .optional()
        })?
        .ok_or_else(|| ChatError::NotFound(format!("room '{}'", name)))
    }

    pub fn general_room(&self) -> Result<Room> {
        self.room_by_name(GENERAL_ROOM_NAME)
    }

    pub fn lounge_room(&self) -> Result<Room> {
        self.room_by_name(LOUNGE_ROOM_NAME)
    }

    // -- Messages ------------------------------------------------------------

    pub fn insert_message(&self, room_id: &str, user_id: &str, body: &str, kind: MessageKind) -> Result<Message> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        self.with(|c| {
            c.execute(
                "INSERT INTO messages (id, room_id, user_id, body, kind, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, room_id, user_id, body, kind.as_str(), now],
            )?;
            c.query_row(
                &format!("{} WHERE m.id = ?1", MESSAGE_SELECT),
                params![id],
                message_from_row,
            )
        })
    }

    /// Room history in chronological order; `limit` keeps only the newest rows.
    pub fn messages(&self, room_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = self.with(|c| {
            let mut stmt = c.prepare(&format!(
                "{} WHERE m.room_id = ?1 ORDER BY m.seq DESC LIMIT ?2",
                MESSAGE_SELECT
            ))?;
            let rows = stmt.query_map(params![room_id, limit], message_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        rows.reverse();
        Ok(rows)
    }

    /// The last `n` messages of a room, oldest first.
    pub fn recent_messages(&self, room_id: &str, n: usize) -> Result<Vec<Message>> {
        self.messages(room_id, Some(n))
    }

    /// Delete every message of a room and return how many went.
    pub fn clear_room(&self, room_id: &str) -> Result<usize> {
        self.with(|c| c.execute("DELETE FROM messages WHERE room_id = ?1", params![room_id]))
    }

    // -- Lounge control ------------------------------------------------------

    pub fn conversation_status(&self) -> Result<ConversationStatus> {
        let columns: Vec<&str> = AgentId::all().iter().map(|a| a.flag_column()).collect();
        let sql = format!(
            "SELECT is_active, current_topic, speed, last_speaker, {} FROM conversation_control WHERE id = 1",
            columns.join(", ")
        );
        self.with(|c| {
            c.query_row(&sql, [], |row| {
                let speed: i64 = row.get(2)?;
                let last: Option<String> = row.get(3)?;
                let mut enabled = BTreeMap::new();
                for (i, agent) in AgentId::all().into_iter().enumerate() {
                    enabled.insert(agent, row.get::<_, bool>(4 + i)?);
                }
                Ok(ConversationStatus {
                    is_active: row.get(0)?,
                    current_topic: row.get(1)?,
                    speed: speed.clamp(1, 3) as u8,
                    enabled,
                    last_speaker: last.as_deref().and_then(AgentId::from_handle),
                })
            })
        })
    }

    /// Apply `patch` and return the resulting status.
    pub fn update_status(&self, patch: &StatusPatch) -> Result<ConversationStatus> {
        if let Some(speed) = patch.speed {
            if !(1..=3).contains(&speed) {
                return Err(ChatError::BadRequest(format!("speed must be 1..=3, got {}", speed)));
            }
        }
        if !patch.is_empty() {
            let now = now_ms();
            self.with(|c| {
                let tx = c.unchecked_transaction()?;
                if let Some(active) = patch.is_active {
                    tx.execute("UPDATE conversation_control SET is_active = ?1 WHERE id = 1", params![active])?;
                }
                if let Some(topic) = &patch.current_topic {
                    tx.execute("UPDATE conversation_control SET current_topic = ?1 WHERE id = 1", params![topic])?;
                }
                if let Some(speed) = patch.speed {
                    tx.execute("UPDATE conversation_control SET speed = ?1 WHERE id = 1", params![speed])?;
                }
                for (agent, on) in &patch.enabled {
                    // Column names come from the fixed AgentId table, never from input.
                    tx.execute(
                        &format!("UPDATE conversation_control SET {} = ?1 WHERE id = 1", agent.flag_column()),
                        params![on],
                    )?;
                }
                tx.execute("UPDATE conversation_control SET updated_at_ms = ?1 WHERE id = 1", params![now])?;
                tx.commit()
            })?;
        }
        self.conversation_status()
    }

    pub fn set_last_speaker(&self, agent: AgentId) -> Result<()> {
        self.with(|c| {
            c.execute(
                "UPDATE conversation_control SET last_speaker = ?1 WHERE id = 1",
                params![agent.handle()],
            )
        })?;
        Ok(())
    }

    // -- Topics --------------------------------------------------------------

    pub fn topics(&self) -> Result<Vec<Topic>> {
        self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, title, description, initial_prompt, category, leader_agent, is_active
                 FROM topics WHERE is_active = 1 ORDER BY category, title",
            )?;
            let rows = stmt.query_map([], topic_from_row)?;
            rows.collect()
        })
    }

    pub fn create_topic(&self, topic: &NewTopic) -> Result<Topic> {
        if topic.title.trim().is_empty() || topic.initial_prompt.trim().is_empty() {
            return Err(ChatError::BadRequest("title and initial_prompt are required".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        self.with(|c| {
            c.execute(
                "INSERT INTO topics (id, title, description, initial_prompt, category, leader_agent, is_active, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, 'personalizado', ?5, 1, ?6)",
                params![
                    id,
                    topic.title.trim(),
                    topic.description,
                    topic.initial_prompt.trim(),
                    topic.leader_agent.map(|a| a.handle()),
                    now
                ],
            )?;
            c.query_row(
                "SELECT id, title, description, initial_prompt, category, leader_agent, is_active
                 FROM topics WHERE id = ?1",
                params![id],
                topic_from_row,
            )
        })
    }

    // -- Session log ---------------------------------------------------------

    pub fn log_session_start(&self, topic: &str, participants: &[AgentId], started_by: Option<&str>) -> Result<()> {
        let names: Vec<&str> = participants.iter().map(|a| a.handle()).collect();
        let participants = serde_json::to_string(&names)?;
        let now = now_ms();
        self.with(|c| {
            c.execute(
                "INSERT INTO conversation_log (session_start_ms, topic_used, participants, started_by)
                 VALUES (?1, ?2, ?3, ?4)",
                params![now, topic, participants, started_by],
            )
        })?;
        Ok(())
    }

    pub fn sessions(&self) -> Result<Vec<SessionLog>> {
        let raw = self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT session_start_ms, topic_used, participants, started_by FROM conversation_log ORDER BY id",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, Option<String>>(3)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raw.into_iter()
            .map(|(start, topic, participants, by)| {
                Ok(SessionLog {
                    session_start_ms: start,
                    topic_used: topic,
                    participants: serde_json::from_str(&participants)?,
                    started_by: by,
                })
            })
            .collect()
    }
}

/// Bot handles and the system account, in any case.
pub fn is_reserved_username(username: &str) -> bool {
    let username = username.trim();
    AgentId::from_handle(username).is_some() || username.eq_ignore_ascii_case(SYSTEM_USERNAME)
}

#[cfg(test)]
impl Store {
    /// Plant a row whose timestamp is not an integer, so any history read
    /// that reaches it fails while inserts keep working.
    pub(crate) fn plant_unreadable_message(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.with(|c| {
            c.execute(
                "INSERT INTO messages (id, room_id, user_id, body, kind, created_at_ms)
                 VALUES (?1, ?2, ?3, 'roto', 'ai', 'not-a-number')",
                params![uuid::Uuid::new_v4().to_string(), room_id, user_id],
            )
        })?;
        Ok(())
    }

    pub(crate) fn message_count(&self, room_id: &str) -> Result<usize> {
        self.with(|c| {
            c.query_row("SELECT COUNT(*) FROM messages WHERE room_id = ?1", params![room_id], |r| {
                r.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }
}
