use alloy::primitives::Address;
use chrono::{DateTime, NaiveDateTime, Utc};
use eyre::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::models::{
    EventId, FlowCreatedRecord, FlowDeletedRecord, FlowRate, FlowRecord, FlowUpdatedRecord,
};
use crate::store::{EntityStore, StoreError};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS flow_created (
  id           TEXT PRIMARY KEY,
  chain_id     INTEGER NOT NULL,
  block_number INTEGER NOT NULL,
  log_index    INTEGER NOT NULL,
  sender       TEXT NOT NULL,
  flow_rate    TEXT NOT NULL, -- int96 stored as decimal string
  indexed_at   TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS flow_updated (
  id            TEXT PRIMARY KEY,
  chain_id      INTEGER NOT NULL,
  block_number  INTEGER NOT NULL,
  log_index     INTEGER NOT NULL,
  sender        TEXT NOT NULL,
  inflow_change TEXT NOT NULL,
  indexed_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS flow_deleted (
  id               TEXT PRIMARY KEY,
  chain_id         INTEGER NOT NULL,
  block_number     INTEGER NOT NULL,
  log_index        INTEGER NOT NULL,
  sender           TEXT NOT NULL,
  remaining_inflow TEXT NOT NULL,
  indexed_at       TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_flow_created_sender ON flow_created (sender);
CREATE INDEX IF NOT EXISTS idx_flow_updated_sender ON flow_updated (sender);
CREATE INDEX IF NOT EXISTS idx_flow_deleted_sender ON flow_deleted (sender);

CREATE TABLE IF NOT EXISTS sync_cursor (
  chain_id   INTEGER PRIMARY KEY,
  last_block INTEGER NOT NULL,
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Which record table a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Created,
    Updated,
    Deleted,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Created, RecordKind::Updated, RecordKind::Deleted];

    fn table(self) -> &'static str {
        match self {
            RecordKind::Created => "flow_created",
            RecordKind::Updated => "flow_updated",
            RecordKind::Deleted => "flow_deleted",
        }
    }

    fn value_column(self) -> &'static str {
        match self {
            RecordKind::Created => "flow_rate",
            RecordKind::Updated => "inflow_change",
            RecordKind::Deleted => "remaining_inflow",
        }
    }

    fn build(self, id: EventId, sender: Address, value: FlowRate) -> FlowRecord {
        match self {
            RecordKind::Created => FlowRecord::FlowCreated(FlowCreatedRecord { id, sender, flow_rate: value }),
            RecordKind::Updated => FlowRecord::FlowUpdated(FlowUpdatedRecord { id, sender, inflow_change: value }),
            RecordKind::Deleted => FlowRecord::FlowDeleted(FlowDeletedRecord { id, sender, remaining_inflow: value }),
        }
    }
}

type RawRow = (String, String, String);

fn raw_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
}

fn decode_row(kind: RecordKind, (id, sender, value): RawRow) -> Result<FlowRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { id: id.clone(), reason };
    let event_id = id.parse::<EventId>().map_err(|e| corrupt(e.to_string()))?;
    let sender = sender.parse::<Address>().map_err(|e| corrupt(e.to_string()))?;
    let value = value.parse::<FlowRate>().map_err(|e| corrupt(e.to_string()))?;
    Ok(kind.build(event_id, sender, value))
}

/// Insert or refresh a record. Identical replays are no-ops in effect.
fn upsert(
    conn: &Connection,
    kind: RecordKind,
    id: EventId,
    sender: Address,
    value: FlowRate,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {table} (id, chain_id, block_number, log_index, sender, {col})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             sender = excluded.sender,
             {col}  = excluded.{col}",
        table = kind.table(),
        col = kind.value_column(),
    );
    conn.execute(
        &sql,
        params![
            id.to_string(),
            id.chain_id as i64,
            id.block_number as i64,
            id.log_index as i64,
            sender_key(sender),
            value.to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_record(conn: &Connection, id: EventId) -> Result<Option<FlowRecord>, StoreError> {
    for kind in RecordKind::ALL {
        let sql = format!(
            "SELECT id, sender, {col} FROM {table} WHERE id = ?1",
            table = kind.table(),
            col = kind.value_column(),
        );
        let row: Option<RawRow> = conn
            .query_row(&sql, [id.to_string()], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .optional()?;
        if let Some(row) = row {
            return decode_row(kind, row).map(Some);
        }
    }
    Ok(None)
}

/// Sender column value. Writes and lookups both go through this so the
/// sender indexes match on plain equality.
fn sender_key(sender: Address) -> String {
    sender.to_string()
}

/// Newest-first listing of one record kind, optionally for a single sender.
pub fn list_records(
    conn: &Connection,
    kind: RecordKind,
    sender: Option<Address>,
    limit: u32,
) -> Result<Vec<FlowRecord>, StoreError> {
    let filter = if sender.is_some() { "WHERE sender = ?2" } else { "" };
    let sql = format!(
        "SELECT id, sender, {col} FROM {table}
         {filter}
         ORDER BY block_number DESC, log_index DESC
         LIMIT ?1",
        table = kind.table(),
        col = kind.value_column(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = match sender {
        Some(sender) => stmt.query_map(params![limit as i64, sender_key(sender)], raw_row)?,
        None => stmt.query_map(params![limit as i64], raw_row)?,
    }
    .collect::<Result<Vec<RawRow>, _>>()?;

    rows.into_iter().map(|row| decode_row(kind, row)).collect()
}

pub fn records_for_sender(conn: &Connection, sender: Address) -> Result<Vec<FlowRecord>, StoreError> {
    let mut records = Vec::new();
    for kind in RecordKind::ALL {
        let sql = format!(
            "SELECT id, sender, {col} FROM {table} WHERE sender = ?1",
            table = kind.table(),
            col = kind.value_column(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([sender_key(sender)], raw_row)?
            .collect::<Result<Vec<RawRow>, _>>()?;
        for row in rows {
            records.push(decode_row(kind, row)?);
        }
    }
    records.sort_by_key(FlowRecord::id);
    Ok(records)
}

/// Entity store backed by a SQLite connection or an open transaction.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl EntityStore for SqliteStore<'_> {
    fn set_flow_created(&mut self, r: &FlowCreatedRecord) -> Result<(), StoreError> {
        upsert(self.conn, RecordKind::Created, r.id, r.sender, r.flow_rate)
    }

    fn set_flow_updated(&mut self, r: &FlowUpdatedRecord) -> Result<(), StoreError> {
        upsert(self.conn, RecordKind::Updated, r.id, r.sender, r.inflow_change)
    }

    fn set_flow_deleted(&mut self, r: &FlowDeletedRecord) -> Result<(), StoreError> {
        upsert(self.conn, RecordKind::Deleted, r.id, r.sender, r.remaining_inflow)
    }

    fn get(&self, id: EventId) -> Result<Option<FlowRecord>, StoreError> {
        get_record(self.conn, id)
    }

    fn records_for_sender(&self, sender: Address) -> Result<Vec<FlowRecord>, StoreError> {
        records_for_sender(self.conn, sender)
    }
}

// ---------- sync cursor ----------

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub chain_id: u64,
    pub last_block: u64,
    pub updated_at: DateTime<Utc>,
}

/// Last fully indexed block for a chain.
pub fn get_cursor(conn: &Connection, chain_id: u64) -> Result<Option<u64>> {
    let block: Option<i64> = conn
        .query_row(
            "SELECT last_block FROM sync_cursor WHERE chain_id = ?1",
            [chain_id as i64],
            |r| r.get(0),
        )
        .optional()?;
    Ok(block.map(|b| b as u64))
}

pub fn set_cursor(conn: &Connection, chain_id: u64, last_block: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_cursor (chain_id, last_block, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(chain_id) DO UPDATE SET
             last_block = excluded.last_block,
             updated_at = excluded.updated_at",
        params![chain_id as i64, last_block as i64],
    )?;
    Ok(())
}

pub fn sync_status(conn: &Connection) -> Result<Vec<SyncStatus>> {
    let mut stmt = conn.prepare("SELECT chain_id, last_block, updated_at FROM sync_cursor ORDER BY chain_id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let statuses = rows
        .into_iter()
        .map(|(chain_id, last_block, updated_at)| SyncStatus {
            chain_id: chain_id as u64,
            last_block: last_block as u64,
            // SQLite datetime('now') is "YYYY-MM-DD HH:MM:SS" in UTC
            updated_at: NaiveDateTime::parse_from_str(&updated_at, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .unwrap_or_else(|_| Utc::now()),
        })
        .collect();
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn created(chain: u64, block: u64, log: u64, sender: Address, rate: i128) -> FlowCreatedRecord {
        FlowCreatedRecord {
            id: EventId::new(chain, block, log),
            sender,
            flow_rate: FlowRate::new(rate).unwrap(),
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        let record = created(1, 100, 2, sender, 500);

        let mut store = SqliteStore::new(&conn);
        store.set_flow_created(&record).unwrap();
        store.set_flow_created(&record).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM flow_created", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store.get(record.id).unwrap(),
            Some(FlowRecord::FlowCreated(record))
        );
    }

    #[test]
    fn sender_history_is_in_chain_order() {
        let conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        let mut store = SqliteStore::new(&conn);

        store
            .set_flow_updated(&FlowUpdatedRecord {
                id: EventId::new(1, 100, 0),
                sender,
                inflow_change: FlowRate::new(-5).unwrap(),
            })
            .unwrap();
        store.set_flow_created(&created(1, 99, 3, sender, 10)).unwrap();
        store
            .set_flow_created(&created(1, 98, 0, address!("00000000000000000000000000000000000000cc"), 1))
            .unwrap();

        let ids: Vec<String> = store
            .records_for_sender(sender)
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["1_99_3", "1_100_0"]);
    }

    #[test]
    fn list_filters_by_sender_and_limits() {
        let conn = memory_db();
        let a = address!("00000000000000000000000000000000000000aa");
        let b = address!("00000000000000000000000000000000000000bb");
        let mut store = SqliteStore::new(&conn);
        for block in 1..=5 {
            store.set_flow_created(&created(1, block, 0, a, block as i128)).unwrap();
        }
        store.set_flow_created(&created(1, 9, 0, b, 9)).unwrap();

        let newest = list_records(&conn, RecordKind::Created, Some(a), 2).unwrap();
        let ids: Vec<String> = newest.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["1_5_0", "1_4_0"]);

        let all = list_records(&conn, RecordKind::Created, None, 100).unwrap();
        assert_eq!(all.len(), 6);
        assert!(list_records(&conn, RecordKind::Deleted, None, 100).unwrap().is_empty());
    }

    #[test]
    fn sender_lookups_use_index() {
        let conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        SqliteStore::new(&conn).set_flow_created(&created(1, 1, 0, sender, 1)).unwrap();

        let stored: String = conn
            .query_row("SELECT sender FROM flow_created", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, sender_key(sender));

        for kind in RecordKind::ALL {
            let sql = format!("EXPLAIN QUERY PLAN SELECT id FROM {} WHERE sender = ?1", kind.table());
            let mut stmt = conn.prepare(&sql).unwrap();
            let plan: Vec<String> = stmt
                .query_map([sender_key(sender)], |r| r.get::<_, String>(3))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            let index = format!("idx_{}_sender", kind.table());
            assert!(plan.iter().any(|step| step.contains(&index)), "{:?}", plan);
        }
    }

    #[test]
    fn unknown_id_is_none() {
        let conn = memory_db();
        assert_eq!(get_record(&conn, EventId::new(1, 1, 1)).unwrap(), None);
    }

    #[test]
    fn cursor_round_trips_and_reports_status() {
        let conn = memory_db();
        assert_eq!(get_cursor(&conn, 42220).unwrap(), None);

        set_cursor(&conn, 42220, 1_000).unwrap();
        set_cursor(&conn, 42220, 1_050).unwrap();
        assert_eq!(get_cursor(&conn, 42220).unwrap(), Some(1_050));

        let status = sync_status(&conn).unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].last_block, 1_050);
    }

    #[test]
    fn on_disk_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.db");
        let path = path.to_str().unwrap();
        let sender = address!("00000000000000000000000000000000000000aa");

        {
            let conn = connect(path).unwrap();
            run_migrations(&conn).unwrap();
            SqliteStore::new(&conn)
                .set_flow_created(&created(1, 100, 2, sender, 500))
                .unwrap();
        }

        let conn = connect(path).unwrap();
        run_migrations(&conn).unwrap();
        let record = get_record(&conn, EventId::new(1, 100, 2)).unwrap().unwrap();
        assert_eq!(record.sender(), sender);
    }
}
