//! # ledger::store: Position Snapshot
//!
//! เก็บ positions ทั้งหมดลงไฟล์ JSON ไฟล์เดียว (เขียนทับทั้งก้อนทุก mutation)
//! และอ่านครั้งเดียวตอน startup
//!
//! ใน tokio runtime การเขียนถูกส่งไป `spawn_blocking` ([`SnapshotStore::write_behind`]):
//! encode ทันทีตอนที่ caller ยังถือ lock อยู่ แล้วเขียนลงดิสก์นอก async thread.
//! ทุก snapshot มี generation; ตัวที่เก่ากว่าที่เขียนไปแล้วจะถูกข้าม
//!
//! ## Layout
//! ```json
//! { "version": 1, "saved_at": "2026-10-19T10:00:00Z", "positions": [ ... ] }
//! ```
//! เก็บเฉพาะ source-of-truth fields: `pnl` / `pnl_percentage` คำนวณใหม่ตอนโหลด
//!
//! ## Migration (ตอน load)
//! - ไม่มีไฟล์                      → เริ่มว่าง
//! - JSON array เปล่าๆ (legacy v0)  → migrate, leverage = 1
//! - `version` = 1                  → parse ตรงๆ
//! - version อื่น                   → ทิ้ง แล้วเริ่มว่าง (ไม่เดา format)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::models::{Position, PositionStatus, PositionType};

pub const SNAPSHOT_VERSION: u64 = 1;

// ─── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct StoredPosition {
    id:            Uuid,
    token_symbol:  String,
    token_name:    String,
    #[serde(rename = "type")]
    position_type: PositionType,
    amount:        f64,
    leverage:      f64,
    entry_price:   f64,
    current_price: f64,
    opened_at:     DateTime<Utc>,
    status:        PositionStatus,
    #[serde(default)]
    closed_at:     Option<DateTime<Utc>>,
}

impl From<&Position> for StoredPosition {
    fn from(p: &Position) -> Self {
        Self {
            id:            p.id,
            token_symbol:  p.token_symbol.clone(),
            token_name:    p.token_name.clone(),
            position_type: p.position_type,
            amount:        p.amount,
            leverage:      p.leverage,
            entry_price:   p.entry_price,
            current_price: p.current_price(),
            opened_at:     p.opened_at,
            status:        p.status(),
            closed_at:     p.closed_at(),
        }
    }
}

impl From<StoredPosition> for Position {
    fn from(s: StoredPosition) -> Self {
        Position::restore(
            s.id,
            s.token_symbol,
            s.token_name,
            s.position_type,
            s.amount,
            s.leverage,
            s.entry_price,
            s.current_price,
            s.opened_at,
            s.status,
            s.closed_at,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version:   u64,
    saved_at:  DateTime<Utc>,
    positions: Vec<StoredPosition>,
}

/// Record ของ blob เก่า (ไม่มี version, camelCase, ไม่มี leverage, timestamp เป็น ms)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyPosition {
    id:            String,
    token_symbol:  String,
    token_name:    String,
    #[serde(rename = "type")]
    position_type: PositionType,
    amount:        f64,
    entry_price:   f64,
    current_price: f64,
    timestamp:     i64,
    status:        PositionStatus,
    #[serde(default)]
    leverage:      Option<f64>,
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path:      PathBuf,
    /// generation ล่าสุดที่ถูก encode
    queued:    Arc<AtomicU64>,
    /// generation ล่าสุดที่ลงดิสก์แล้ว: ถือ lock ตลอดการเขียน
    written:   Arc<Mutex<u64>>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path:      path.into(),
            queued:    Arc::new(AtomicU64::new(0)),
            written:   Arc::new(Mutex::new(0)),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// อ่าน snapshot + migrate. Error เฉพาะ IO / JSON พัง: version ไม่ตรงไม่ใช่ error
    pub fn load(&self) -> Result<Vec<Position>, PersistenceError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No snapshot yet, starting empty");
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let positions = migrate(value)?;

        info!(
            path  = %self.path.display(),
            count = positions.len(),
            "📂 Snapshot loaded"
        );
        Ok(positions)
    }

    /// เขียนทับทั้งก้อนแบบ atomic (tmp file + rename) บน thread ปัจจุบัน
    pub fn save(&self, positions: &[Position]) -> Result<(), PersistenceError> {
        let generation = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        let encoded = encode(positions)?;
        self.write_generation(generation, &encoded)
    }

    /// Write-through ที่ไม่ block async worker: error ถูก log แล้วทำงานต่อใน memory
    ///
    /// นอก runtime (เช่น CLI / unit test แบบ sync) จะเขียน inline
    pub fn write_behind(&self, positions: &[Position]) {
        let generation = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        let encoded = match encode(positions) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "Snapshot encode failed, continuing in memory");
                return;
            }
        };

        let Ok(runtime) = Handle::try_current() else {
            self.report(self.write_generation(generation, &encoded));
            return;
        };

        let store = self.clone();
        let handle = runtime.spawn_blocking(move || {
            store.report(store.write_generation(generation, &encoded));
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// รอจนทุก write ที่สั่งไปแล้วลงดิสก์ (ใช้ตอน shutdown)
    pub async fn flush(&self) {
        let pending: Vec<_> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.drain(..).collect()
        };
        for handle in pending {
            if let Err(e) = handle.await {
                error!(error = %e, "Snapshot writer task failed");
            }
        }
    }

    fn write_generation(&self, generation: u64, encoded: &[u8]) -> Result<(), PersistenceError> {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if *written > generation {
            debug!(generation, latest = *written, "Skipping superseded snapshot");
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        *written = generation;
        Ok(())
    }

    fn report(&self, result: Result<(), PersistenceError>) {
        if let Err(e) = result {
            error!(path = %self.path.display(), error = %e, "Snapshot write failed, continuing in memory");
        }
    }
}

fn encode(positions: &[Position]) -> Result<Vec<u8>, PersistenceError> {
    let snapshot = Snapshot {
        version:   SNAPSHOT_VERSION,
        saved_at:  Utc::now(),
        positions: positions.iter().map(StoredPosition::from).collect(),
    };
    Ok(serde_json::to_vec_pretty(&snapshot)?)
}

// ─── Migration ────────────────────────────────────────────────────────────────

fn migrate(value: Value) -> Result<Vec<Position>, PersistenceError> {
    match value {
        Value::Array(_) => {
            let legacy: Vec<LegacyPosition> = serde_json::from_value(value)?;
            info!(count = legacy.len(), "Migrating unversioned snapshot (v0 → v{SNAPSHOT_VERSION})");
            Ok(legacy.into_iter().filter_map(migrate_v0).collect())
        }
        Value::Object(ref map) => {
            let version = map.get("version").and_then(Value::as_u64);
            if version == Some(SNAPSHOT_VERSION) {
                let snapshot: Snapshot = serde_json::from_value(value)?;
                Ok(snapshot.positions.into_iter().map(Position::from).collect())
            } else {
                warn!(?version, expected = SNAPSHOT_VERSION, "Unknown snapshot version, discarding");
                Ok(Vec::new())
            }
        }
        _ => {
            warn!("Snapshot is neither an object nor an array, discarding");
            Ok(Vec::new())
        }
    }
}

fn migrate_v0(legacy: LegacyPosition) -> Option<Position> {
    if !legacy.entry_price.is_finite() || legacy.entry_price <= 0.0 {
        warn!(id = %legacy.id, entry_price = legacy.entry_price, "Dropping legacy position with invalid entry price");
        return None;
    }

    let id = Uuid::parse_str(&legacy.id).unwrap_or_else(|_| Uuid::new_v4());
    let opened_at = DateTime::from_timestamp_millis(legacy.timestamp).unwrap_or_else(Utc::now);
    let closed_at = (legacy.status == PositionStatus::Closed).then(Utc::now);

    Some(Position::restore(
        id,
        legacy.token_symbol,
        legacy.token_name,
        legacy.position_type,
        legacy.amount,
        legacy.leverage.filter(|l| l.is_finite() && *l > 0.0).unwrap_or(1.0),
        legacy.entry_price,
        legacy.current_price,
        opened_at,
        legacy.status,
        closed_at,
    ))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SnapshotStore {
        let path = std::env::temp_dir()
            .join(format!("tokenswiper-store-{}", Uuid::new_v4()))
            .join("positions.json");
        SnapshotStore::new(path)
    }

    fn sample() -> Position {
        Position::restore(
            Uuid::new_v4(),
            "ETH".into(),
            "Ethereum".into(),
            PositionType::Long,
            100.0,
            2.0,
            3000.0,
            3300.0,
            Utc::now(),
            PositionStatus::Open,
            None,
        )
    }

    #[test]
    fn test_missing_file_is_empty() {
        assert!(temp_store().load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_recomputes_pnl() {
        let store = temp_store();
        let original = sample();
        store.save(std::slice::from_ref(&original)).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(!raw.contains("pnl"), "derived fields must not be persisted");

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, original.id);
        assert!((loaded[0].pnl() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_legacy_array_is_migrated() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[
              {"id":"pos_1718000000000_abc123def","tokenSymbol":"SOL","tokenName":"Wrapped SOL",
               "type":"short","amount":50,"entryPrice":20,"currentPrice":18,"pnl":5,
               "timestamp":1718000000000,"status":"open"},
              {"id":"pos_bad","tokenSymbol":"X","tokenName":"X","type":"long","amount":1,
               "entryPrice":0,"currentPrice":1,"pnl":0,"timestamp":0,"status":"open"}
            ]"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].leverage, 1.0);
        // pnl ใน blob เก่า (5) ถูกทิ้ง คำนวณใหม่จาก inputs
        assert!((loaded[0].pnl() - 5.0).abs() < 1e-9);
        assert_eq!(loaded[0].opened_at.timestamp_millis(), 1_718_000_000_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_behind_keeps_latest_generation() {
        let store = temp_store();
        let mut positions = vec![sample()];
        for i in 0..20 {
            positions[0].reprice(3000.0 + i as f64);
            store.write_behind(&positions);
        }
        store.flush().await;

        let loaded = store.load().unwrap();
        assert_eq!(loaded[0].current_price(), 3019.0);
        assert!(store.in_flight.lock().unwrap().is_empty());
    }

    #[test]
    fn test_write_behind_without_runtime_is_inline() {
        let store = temp_store();
        store.write_behind(&[sample()]);
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_superseded_generation_is_skipped() {
        let store = temp_store();
        let newer = encode(&[sample(), sample()]).unwrap();
        let older = encode(&[sample()]).unwrap();
        store.write_generation(2, &newer).unwrap();
        store.write_generation(1, &older).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_version_is_discarded() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"{"version": 99, "positions": [{"whatever": true}]}"#).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(PersistenceError::Encoding(_))));
    }
}
