// src/repository/sqlite.rs
//! Durable repository on a single SQLite file.
//!
//! Each trait method runs as one statement or one transaction on a blocking
//! worker. Structured columns (source cache, discovery record, watermark) are
//! stored as JSON text; timestamps as fixed-width RFC 3339 so they sort as text.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::Repository;
use crate::errors::RepoError;
use crate::model::{
    ChannelId, ContentItem, ContentPayload, DestinationKind, DiscoveryRecord, ForwardingRule, GuildId,
    ItemId, NewForwardingRule, NewSource, RuleId, Source, SourceCache, SourceId, SourceType,
};
use crate::watermark::Watermark;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild INTEGER NOT NULL,
    name TEXT NOT NULL COLLATE NOCASE,
    source_type TEXT NOT NULL,
    identifier TEXT NOT NULL,
    channel INTEGER,
    enabled INTEGER NOT NULL DEFAULT 1,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    cache TEXT NOT NULL,
    discovery TEXT,
    watermark TEXT,
    last_polled_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (guild, name)
);

CREATE TABLE IF NOT EXISTS content_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    author TEXT,
    url TEXT NOT NULL,
    published_at TEXT,
    thumbnail_url TEXT,
    fetched_at TEXT NOT NULL,
    summary TEXT,
    summarized_at TEXT,
    posted_at TEXT,
    UNIQUE (source_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_items_pending_summary
    ON content_items(fetched_at, id) WHERE summary IS NULL;
CREATE INDEX IF NOT EXISTS idx_items_pending_delivery
    ON content_items(fetched_at, id) WHERE summary IS NOT NULL AND posted_at IS NULL;

CREATE TABLE IF NOT EXISTS guild_channels (
    guild INTEGER PRIMARY KEY,
    channel INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS forwarding_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild INTEGER NOT NULL,
    source_channel INTEGER NOT NULL,
    destination_channel INTEGER NOT NULL,
    destination_kind TEXT NOT NULL,
    paused INTEGER NOT NULL DEFAULT 0,
    last_message_id INTEGER,
    messages_forwarded INTEGER NOT NULL DEFAULT 0,
    last_forwarded_at TEXT,
    UNIQUE (guild, source_channel, destination_channel)
);
"#;

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                RepoError::Conflict(e.to_string())
            }
            _ => RepoError::Unavailable(e.to_string()),
        }
    }
}

/// Repository backed by one SQLite database file.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        let repo = Self::init(conn).with_context(|| format!("preparing schema in {}", path.display()))?;
        info!(path = %path.display(), "state database opened");
        Ok(repo)
    }

    /// Fresh database that lives as long as the value.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on a blocking worker.
    async fn call<T, F>(&self, f: F) -> Result<T, RepoError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepoError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| RepoError::Unavailable("state database lock poisoned".into()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| RepoError::Unavailable(format!("state database task failed: {e}")))?
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, RepoError> {
    serde_json::to_string(value).map_err(|e| RepoError::Unavailable(format!("encoding column: {e}")))
}

fn opt_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>, RepoError> {
    value.map(|v| to_json(v)).transpose()
}

fn conversion(e: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e)
}

fn int(row: &Row<'_>, col: &str) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(col)? as u64)
}

fn opt_int(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(col)?.map(|v| v as u64))
}

fn time(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(Box::new(e)))
}

fn opt_time(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion(Box::new(e)))
    })
    .transpose()
}

fn json<T: DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|e| conversion(Box::new(e)))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion(Box::new(e))))
        .transpose()
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    let source_type: String = row.get("source_type")?;
    Ok(Source {
        id: int(row, "id")?,
        guild: int(row, "guild")?,
        name: row.get("name")?,
        source_type: source_type
            .parse::<SourceType>()
            .map_err(|e| conversion(e.into()))?,
        identifier: row.get("identifier")?,
        channel: opt_int(row, "channel")?,
        enabled: row.get("enabled")?,
        consecutive_failures: row.get("consecutive_failures")?,
        cache: json(row, "cache")?,
        discovery: opt_json_col(row, "discovery")?,
        watermark: opt_json_col(row, "watermark")?,
        last_polled_at: opt_time(row, "last_polled_at")?,
        created_at: time(row, "created_at")?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: int(row, "id")?,
        source_id: int(row, "source_id")?,
        external_id: row.get("external_id")?,
        title: row.get("title")?,
        body: row.get("body")?,
        author: row.get("author")?,
        url: row.get("url")?,
        published_at: opt_time(row, "published_at")?,
        thumbnail_url: row.get("thumbnail_url")?,
        fetched_at: time(row, "fetched_at")?,
        summary: row.get("summary")?,
        summarized_at: opt_time(row, "summarized_at")?,
        posted_at: opt_time(row, "posted_at")?,
    })
}

fn kind_str(kind: DestinationKind) -> &'static str {
    match kind {
        DestinationKind::Channel => "channel",
        DestinationKind::Thread => "thread",
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ForwardingRule> {
    let kind: String = row.get("destination_kind")?;
    let destination_kind = match kind.as_str() {
        "channel" => DestinationKind::Channel,
        "thread" => DestinationKind::Thread,
        other => return Err(conversion(format!("unknown destination kind '{other}'").into())),
    };
    Ok(ForwardingRule {
        id: int(row, "id")?,
        guild: int(row, "guild")?,
        source_channel: int(row, "source_channel")?,
        destination_channel: int(row, "destination_channel")?,
        destination_kind,
        paused: row.get("paused")?,
        last_message_id: opt_int(row, "last_message_id")?,
        messages_forwarded: int(row, "messages_forwarded")?,
        last_forwarded_at: opt_time(row, "last_forwarded_at")?,
    })
}

fn load_source(conn: &Connection, id: SourceId) -> rusqlite::Result<Option<Source>> {
    conn.query_row("SELECT * FROM sources WHERE id = ?1", params![id as i64], source_from_row)
        .optional()
}

fn load_rule(conn: &Connection, id: RuleId) -> rusqlite::Result<Option<ForwardingRule>> {
    conn.query_row(
        "SELECT * FROM forwarding_rules WHERE id = ?1",
        params![id as i64],
        rule_from_row,
    )
    .optional()
}

fn query_items(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> rusqlite::Result<Vec<ContentItem>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, item_from_row)?;
    rows.collect()
}

/// An UPDATE that matched no row means the entity is gone.
fn touched(changed: usize, entity: &'static str, id: u64) -> Result<(), RepoError> {
    if changed == 0 {
        Err(RepoError::NotFound { entity, id })
    } else {
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn add_source(&self, new: NewSource) -> Result<Source, RepoError> {
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO sources (guild, name, source_type, identifier, channel, cache, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (guild, name) DO NOTHING",
                params![
                    new.guild as i64,
                    new.name,
                    new.source_type.as_str(),
                    new.identifier,
                    new.channel.map(|c| c as i64),
                    to_json(&SourceCache::default())?,
                    stamp(Utc::now()),
                ],
            )?;
            if inserted == 0 {
                return Err(RepoError::Conflict(format!(
                    "source '{}' already exists in guild {}",
                    new.name, new.guild
                )));
            }
            let id = conn.last_insert_rowid() as u64;
            load_source(conn, id)?.ok_or(RepoError::NotFound { entity: "source", id })
        })
        .await
    }

    async fn remove_source(&self, guild: GuildId, name: &str) -> Result<Option<Source>, RepoError> {
        let name = name.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let found = tx
                .query_row(
                    "SELECT * FROM sources WHERE guild = ?1 AND name = ?2",
                    params![guild as i64, name],
                    source_from_row,
                )
                .optional()?;
            let Some(source) = found else {
                return Ok(None);
            };
            tx.execute("DELETE FROM content_items WHERE source_id = ?1", params![source.id as i64])?;
            tx.execute("DELETE FROM sources WHERE id = ?1", params![source.id as i64])?;
            tx.commit()?;
            Ok(Some(source))
        })
        .await
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, RepoError> {
        self.call(move |conn| Ok(load_source(conn, id)?)).await
    }

    async fn find_source(&self, guild: GuildId, name: &str) -> Result<Option<Source>, RepoError> {
        let name = name.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM sources WHERE guild = ?1 AND name = ?2",
                    params![guild as i64, name],
                    source_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, RepoError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM sources WHERE (?1 IS NULL OR guild = ?1) ORDER BY id")?;
            let rows = stmt.query_map(params![guild.map(|g| g as i64)], source_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_enabled_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, RepoError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM sources WHERE enabled = 1 AND (?1 IS NULL OR guild = ?1) ORDER BY id",
            )?;
            let rows = stmt.query_map(params![guild.map(|g| g as i64)], source_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn set_source_enabled(&self, id: SourceId, enabled: bool) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE sources
                 SET enabled = ?2,
                     consecutive_failures = CASE WHEN ?2 THEN 0 ELSE consecutive_failures END
                 WHERE id = ?1",
                params![id as i64, enabled],
            )?;
            touched(n, "source", id)
        })
        .await
    }

    async fn disable_source(&self, id: SourceId) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute("UPDATE sources SET enabled = 0 WHERE id = ?1", params![id as i64])?;
            touched(n, "source", id)
        })
        .await
    }

    async fn set_source_channel(&self, id: SourceId, channel: Option<ChannelId>) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE sources SET channel = ?2 WHERE id = ?1",
                params![id as i64, channel.map(|c| c as i64)],
            )?;
            touched(n, "source", id)
        })
        .await
    }

    async fn increment_failure(&self, id: SourceId) -> Result<u32, RepoError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE sources SET consecutive_failures = MIN(consecutive_failures + 1, 4294967295) WHERE id = ?1",
                params![id as i64],
            )?;
            touched(n, "source", id)?;
            let count: u32 = tx.query_row(
                "SELECT consecutive_failures FROM sources WHERE id = ?1",
                params![id as i64],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn reset_failure(&self, id: SourceId) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE sources SET consecutive_failures = 0 WHERE id = ?1",
                params![id as i64],
            )?;
            touched(n, "source", id)
        })
        .await
    }

    async fn record_poll(
        &self,
        id: SourceId,
        watermark: Option<Watermark>,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let watermark = opt_json(watermark.as_ref())?;
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE sources SET last_polled_at = ?2, watermark = COALESCE(?3, watermark) WHERE id = ?1",
                params![id as i64, stamp(at), watermark],
            )?;
            touched(n, "source", id)
        })
        .await
    }

    async fn set_source_cache(&self, id: SourceId, cache: SourceCache) -> Result<(), RepoError> {
        let cache = to_json(&cache)?;
        self.call(move |conn| {
            let n = conn.execute("UPDATE sources SET cache = ?2 WHERE id = ?1", params![id as i64, cache])?;
            touched(n, "source", id)
        })
        .await
    }

    async fn get_discovery_cache(&self, id: SourceId) -> Result<Option<DiscoveryRecord>, RepoError> {
        self.call(move |conn| Ok(load_source(conn, id)?.and_then(|s| s.discovery)))
            .await
    }

    async fn set_discovery_cache(&self, id: SourceId, record: Option<DiscoveryRecord>) -> Result<(), RepoError> {
        let record = opt_json(record.as_ref())?;
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE sources SET discovery = ?2 WHERE id = ?1",
                params![id as i64, record],
            )?;
            touched(n, "source", id)
        })
        .await
    }

    async fn content_item_exists(&self, source_id: SourceId, external_id: &str) -> Result<bool, RepoError> {
        let external_id = external_id.to_string();
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM content_items WHERE source_id = ?1 AND external_id = ?2)",
                params![source_id as i64, external_id],
                |row| row.get::<_, bool>(0),
            )?)
        })
        .await
    }

    async fn get_or_create_content_item(
        &self,
        source_id: SourceId,
        external_id: &str,
        payload: ContentPayload,
    ) -> Result<(ContentItem, bool), RepoError> {
        let external_id = external_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let source_exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM sources WHERE id = ?1)",
                params![source_id as i64],
                |row| row.get(0),
            )?;
            if !source_exists {
                return Err(RepoError::NotFound {
                    entity: "source",
                    id: source_id,
                });
            }
            let inserted = tx.execute(
                "INSERT INTO content_items
                     (source_id, external_id, title, body, author, url, published_at, thumbnail_url, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (source_id, external_id) DO NOTHING",
                params![
                    source_id as i64,
                    external_id,
                    payload.title,
                    payload.body,
                    payload.author,
                    payload.url,
                    payload.published_at.map(stamp),
                    payload.thumbnail_url,
                    stamp(Utc::now()),
                ],
            )?;
            let item = tx.query_row(
                "SELECT * FROM content_items WHERE source_id = ?1 AND external_id = ?2",
                params![source_id as i64, external_id],
                item_from_row,
            )?;
            tx.commit()?;
            Ok((item, inserted == 1))
        })
        .await
    }

    async fn list_unsummarized(&self) -> Result<Vec<ContentItem>, RepoError> {
        self.call(|conn| {
            Ok(query_items(
                conn,
                "SELECT * FROM content_items WHERE summary IS NULL ORDER BY fetched_at, id",
                [],
            )?)
        })
        .await
    }

    async fn set_summary(&self, item_id: ItemId, text: &str, at: DateTime<Utc>) -> Result<(), RepoError> {
        let text = text.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE content_items SET summary = ?2, summarized_at = ?3 WHERE id = ?1",
                params![item_id as i64, text, stamp(at)],
            )?;
            touched(n, "content item", item_id)
        })
        .await
    }

    async fn list_undelivered(&self) -> Result<Vec<ContentItem>, RepoError> {
        self.call(|conn| {
            Ok(query_items(
                conn,
                "SELECT * FROM content_items
                 WHERE summary IS NOT NULL AND posted_at IS NULL
                 ORDER BY fetched_at, id",
                [],
            )?)
        })
        .await
    }

    async fn mark_posted(&self, item_id: ItemId, at: DateTime<Utc>) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE content_items SET posted_at = COALESCE(posted_at, ?2) WHERE id = ?1",
                params![item_id as i64, stamp(at)],
            )?;
            touched(n, "content item", item_id)
        })
        .await
    }

    async fn items_for_source(&self, source_id: SourceId) -> Result<Vec<ContentItem>, RepoError> {
        self.call(move |conn| {
            Ok(query_items(
                conn,
                "SELECT * FROM content_items WHERE source_id = ?1 ORDER BY fetched_at, id",
                params![source_id as i64],
            )?)
        })
        .await
    }

    async fn guild_default_channel(&self, guild: GuildId) -> Result<Option<ChannelId>, RepoError> {
        self.call(move |conn| {
            let channel = conn
                .query_row(
                    "SELECT channel FROM guild_channels WHERE guild = ?1",
                    params![guild as i64],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(channel.map(|c| c as u64))
        })
        .await
    }

    async fn set_guild_default_channel(&self, guild: GuildId, channel: Option<ChannelId>) -> Result<(), RepoError> {
        self.call(move |conn| {
            match channel {
                Some(c) => conn.execute(
                    "INSERT INTO guild_channels (guild, channel) VALUES (?1, ?2)
                     ON CONFLICT (guild) DO UPDATE SET channel = excluded.channel",
                    params![guild as i64, c as i64],
                )?,
                None => conn.execute("DELETE FROM guild_channels WHERE guild = ?1", params![guild as i64])?,
            };
            Ok(())
        })
        .await
    }

    async fn add_forwarding_rule(&self, new: NewForwardingRule) -> Result<ForwardingRule, RepoError> {
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO forwarding_rules (guild, source_channel, destination_channel, destination_kind)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (guild, source_channel, destination_channel) DO NOTHING",
                params![
                    new.guild as i64,
                    new.source_channel as i64,
                    new.destination_channel as i64,
                    kind_str(new.destination_kind),
                ],
            )?;
            if inserted == 0 {
                return Err(RepoError::Conflict(format!(
                    "forwarding {} -> {} already exists",
                    new.source_channel, new.destination_channel
                )));
            }
            let id = conn.last_insert_rowid() as u64;
            load_rule(conn, id)?.ok_or(RepoError::NotFound {
                entity: "forwarding rule",
                id,
            })
        })
        .await
    }

    async fn remove_forwarding_rule(&self, id: RuleId) -> Result<bool, RepoError> {
        self.call(move |conn| {
            let n = conn.execute("DELETE FROM forwarding_rules WHERE id = ?1", params![id as i64])?;
            Ok(n > 0)
        })
        .await
    }

    async fn get_forwarding_rule(&self, id: RuleId) -> Result<Option<ForwardingRule>, RepoError> {
        self.call(move |conn| Ok(load_rule(conn, id)?)).await
    }

    async fn list_forwarding_rules(&self, guild: Option<GuildId>) -> Result<Vec<ForwardingRule>, RepoError> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM forwarding_rules WHERE (?1 IS NULL OR guild = ?1) ORDER BY id")?;
            let rows = stmt.query_map(params![guild.map(|g| g as i64)], rule_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn set_rule_paused(&self, id: RuleId, paused: bool) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE forwarding_rules SET paused = ?2 WHERE id = ?1",
                params![id as i64, paused],
            )?;
            touched(n, "forwarding rule", id)
        })
        .await
    }

    async fn record_forward(
        &self,
        id: RuleId,
        last_message_id: u64,
        forwarded: u64,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE forwarding_rules
                 SET last_message_id = MAX(COALESCE(last_message_id, ?2), ?2),
                     messages_forwarded = messages_forwarded + ?3,
                     last_forwarded_at = CASE WHEN ?3 > 0 THEN ?4 ELSE last_forwarded_at END
                 WHERE id = ?1",
                params![id as i64, last_message_id as i64, forwarded as i64, stamp(at)],
            )?;
            touched(n, "forwarding rule", id)
        })
        .await
    }
}
