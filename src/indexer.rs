use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use rusqlite::Connection;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{self, SqliteStore};
use crate::models::EventPayload;
use crate::parser::{self, DecodeError};
use crate::rpc::{Log, RpcClient};
use crate::mapper;

const RPC_PAUSE: Duration = Duration::from_millis(200);
const INITIAL_RETRY_SECS: u64 = 10;
const MAX_RETRY_SECS: u64 = 120;

/// Split `[from, to]` into inclusive chunks of at most `max` blocks.
pub fn block_ranges(from: u64, to: u64, max: u64) -> Vec<(u64, u64)> {
    let max = max.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Map a batch of logs into records and advance the chain cursor, all in
/// one transaction. Removed (reorged) logs are skipped.
///
/// A log that does not decode aborts the batch before anything is written
/// when it comes from one of `app_addresses`. From any other emitter (or
/// with an empty list) it is a foreign contract reusing an event signature
/// and is skipped.
pub fn apply_logs(
    conn: &mut Connection,
    chain_id: u64,
    app_addresses: &[Address],
    logs: &[Log],
    through_block: u64,
) -> Result<usize> {
    let mut payloads = Vec::with_capacity(logs.len());
    for log in logs {
        if log.removed {
            warn!("Skipping removed log {} #{}", log.tx_hash, log.log_index_hex);
            continue;
        }
        match parser::decode_log(chain_id, log) {
            Ok(payload) => payloads.push(payload),
            Err(e) if is_app_emitter(app_addresses, log) => {
                return Err(eyre::Report::new(e).wrap_err(format!(
                    "malformed log {} #{} from {}",
                    log.tx_hash, log.log_index_hex, log.address
                )));
            }
            Err(e) => {
                warn!(
                    "Skipping undecodable log {} #{} from {}: {}",
                    log.tx_hash, log.log_index_hex, log.address, e
                );
            }
        }
    }
    payloads.sort_by_key(EventPayload::id);

    let tx = conn.transaction()?;
    {
        let mut store = SqliteStore::new(&tx);
        for payload in &payloads {
            mapper::process(payload, &mut store)?;
        }
    }
    db::set_cursor(&tx, chain_id, through_block)?;
    tx.commit()?;

    Ok(payloads.len())
}

fn is_app_emitter(app_addresses: &[Address], log: &Log) -> bool {
    log.address
        .parse::<Address>()
        .map(|emitter| app_addresses.contains(&emitter))
        .unwrap_or(false)
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| eyre!("database mutex poisoned"))
}

/// Index everything between the stored cursor and the confirmed head.
async fn sync_once(cfg: &Config, rpc: &RpcClient, chain_id: u64, conn: &Mutex<Connection>) -> Result<usize> {
    let latest_block = rpc.get_block_number().await?;
    let target_block = latest_block.saturating_sub(cfg.confirmations);

    let cursor = db::get_cursor(&*lock(conn)?, chain_id)?;
    let from_block = match cursor {
        Some(last) => last + 1,
        None => {
            let start = cfg
                .start_block
                .unwrap_or_else(|| target_block.saturating_sub(cfg.backfill_blocks));
            info!("Backfill: scanning {} → {}", start, target_block);
            start
        }
    };

    if from_block > target_block {
        return Ok(0);
    }

    let topics = parser::flow_topics();
    let mut total = 0;
    for (start, end) in block_ranges(from_block, target_block, cfg.max_block_range) {
        let logs = rpc
            .get_logs(&cfg.app_addresses, &topics, start, end)
            .await
            .wrap_err_with(|| format!("eth_getLogs {} → {}", start, end))?;

        let indexed = apply_logs(&mut *lock(conn)?, chain_id, &cfg.app_addresses, &logs, end)?;
        if indexed > 0 {
            info!("Indexed blocks {} → {}: {} flow events", start, end, indexed);
        }
        total += indexed;

        sleep(RPC_PAUSE).await;
    }

    info!("Synced chain {} up to block {} ({} events)", chain_id, target_block, total);
    Ok(total)
}

async fn resolve_chain_id(cfg: &Config, rpc: &RpcClient) -> u64 {
    if let Some(id) = cfg.chain_id {
        return id;
    }
    let mut retry_delay = INITIAL_RETRY_SECS;
    loop {
        match rpc.get_chain_id().await {
            Ok(id) => return id,
            Err(e) => {
                warn!("eth_chainId failed: {:?}. Retrying in {}s", e, retry_delay);
                sleep(Duration::from_secs(retry_delay)).await;
                retry_delay = (retry_delay * 2).min(MAX_RETRY_SECS);
            }
        }
    }
}

pub async fn run(cfg: Config, conn: Arc<Mutex<Connection>>) -> Result<()> {
    let rpc = RpcClient::new(cfg.rpc_http_url.clone())?;
    let chain_id = resolve_chain_id(&cfg, &rpc).await;

    if cfg.app_addresses.is_empty() {
        info!("Indexer started on chain {} (any emitter)", chain_id);
    } else {
        info!("Indexer started on chain {} for {:?}", chain_id, cfg.app_addresses);
    }

    let poll = Duration::from_secs(cfg.poll_interval_secs);
    let mut retry_delay = INITIAL_RETRY_SECS;

    loop {
        match sync_once(&cfg, &rpc, chain_id, &conn).await {
            Ok(_) => {
                retry_delay = INITIAL_RETRY_SECS;
                sleep(poll).await;
            }
            Err(e) if e.downcast_ref::<DecodeError>().is_some() => {
                error!("Malformed flow event, stopping indexer: {:?}", e);
                return Err(e);
            }
            Err(e) => {
                warn!("Sync failed this round: {:?}. Retrying in {}s", e, retry_delay);
                sleep(Duration::from_secs(retry_delay)).await;
                retry_delay = (retry_delay * 2).min(MAX_RETRY_SECS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_cursor, list_records, run_migrations, RecordKind};
    use crate::parser::tests::created_log;
    use alloy::primitives::address;

    const APP: Address = address!("00000000000000000000000000000000000000c0");

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn splits_ranges() {
        assert_eq!(block_ranges(10, 14, 2), vec![(10, 11), (12, 13), (14, 14)]);
        assert_eq!(block_ranges(5, 5, 100), vec![(5, 5)]);
        assert!(block_ranges(6, 5, 100).is_empty());
        assert_eq!(block_ranges(0, 2, 0), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn redelivered_batch_is_idempotent() {
        let mut conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        let logs = vec![created_log(sender, 500, 100, 2), created_log(sender, 700, 100, 1)];

        assert_eq!(apply_logs(&mut conn, 1, &[], &logs, 120).unwrap(), 2);
        assert_eq!(apply_logs(&mut conn, 1, &[], &logs, 120).unwrap(), 2);

        let records = list_records(&conn, RecordKind::Created, Some(sender), 10).unwrap();
        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["1_100_2", "1_100_1"]);
        assert_eq!(get_cursor(&conn, 1).unwrap(), Some(120));
    }

    #[test]
    fn malformed_app_log_writes_nothing() {
        let mut conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        let mut bad = created_log(sender, 1, 101, 0);
        bad.data = "0x".to_string();
        let logs = vec![created_log(sender, 500, 100, 2), bad];

        let err = apply_logs(&mut conn, 1, &[APP], &logs, 120).unwrap_err();
        assert!(err.downcast_ref::<DecodeError>().is_some());
        assert!(list_records(&conn, RecordKind::Created, None, 10).unwrap().is_empty());
        assert_eq!(get_cursor(&conn, 1).unwrap(), None);
    }

    #[test]
    fn foreign_lookalike_logs_are_skipped() {
        let mut conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        // same topic0, but sender not indexed: one topic and two data words
        let mut lookalike = created_log(sender, 1, 100, 3);
        lookalike.address = "0x00000000000000000000000000000000000000ff".to_string();
        lookalike.topics.truncate(1);
        lookalike.data = format!("0x{}", "00".repeat(64));
        let logs = vec![created_log(sender, 500, 100, 2), lookalike];

        // watching every emitter
        assert_eq!(apply_logs(&mut conn, 8453, &[], &logs, 100).unwrap(), 1);
        assert_eq!(get_cursor(&conn, 8453).unwrap(), Some(100));

        // watching the app only; the lookalike comes from elsewhere
        assert_eq!(apply_logs(&mut conn, 8453, &[APP], &logs, 101).unwrap(), 1);
        assert_eq!(get_cursor(&conn, 8453).unwrap(), Some(101));

        let ids: Vec<String> = list_records(&conn, RecordKind::Created, None, 10)
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["8453_100_2"]);
    }

    #[test]
    fn removed_logs_are_skipped() {
        let mut conn = memory_db();
        let sender = address!("00000000000000000000000000000000000000aa");
        let mut reorged = created_log(sender, 1, 100, 0);
        reorged.removed = true;

        assert_eq!(apply_logs(&mut conn, 1, &[], &[reorged], 100).unwrap(), 0);
        assert_eq!(get_cursor(&conn, 1).unwrap(), Some(100));
    }

    #[test]
    fn empty_batch_still_advances_cursor() {
        let mut conn = memory_db();
        apply_logs(&mut conn, 8453, &[APP], &[], 77).unwrap();
        assert_eq!(get_cursor(&conn, 8453).unwrap(), Some(77));
    }
}
