// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/record/sqlite.rs - SQLite 台账与巡检记录存储
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::{
  InspectionRecord, InspectionStore, Inventory, InventoryAsset, Measurements, NewAsset,
  NewInspection, RecordError,
};

const ASSET_COLUMNS: &str = "id, name, location, asset_type, built_year, last_inspection";
const INSPECTION_COLUMNS: &str =
  "id, inventory_id, date, defects_json, severity, length, width, artifact_path";

pub struct SqliteStore {
  conn: Connection,
}

/// 数据库中的原始行，读取后再转换为领域类型
struct AssetRow {
  id: i64,
  name: String,
  location: String,
  asset_type: String,
  built_year: i32,
  last_inspection: Option<String>,
}

struct InspectionRow {
  id: i64,
  asset_id: i64,
  date: String,
  defects_json: String,
  severity: Option<String>,
  length: f64,
  width: f64,
  artifact: String,
}

impl AssetRow {
  fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      name: row.get(1)?,
      location: row.get(2)?,
      asset_type: row.get(3)?,
      built_year: row.get(4)?,
      last_inspection: row.get(5)?,
    })
  }

  fn into_asset(self) -> Result<InventoryAsset, RecordError> {
    Ok(InventoryAsset {
      id: self.id,
      name: self.name,
      location: self.location,
      asset_type: self.asset_type.parse()?,
      built_year: self.built_year,
      last_inspection: self.last_inspection.as_deref().map(parse_time).transpose()?,
    })
  }
}

impl InspectionRow {
  fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      asset_id: row.get(1)?,
      date: row.get(2)?,
      defects_json: row.get(3)?,
      severity: row.get(4)?,
      length: row.get(5)?,
      width: row.get(6)?,
      artifact: row.get(7)?,
    })
  }

  fn into_record(self) -> Result<InspectionRecord, RecordError> {
    Ok(InspectionRecord {
      id: self.id,
      asset_id: self.asset_id,
      date: parse_time(&self.date)?,
      defects: serde_json::from_str(&self.defects_json)?,
      severity: self.severity,
      measurements: Measurements::new(self.length, self.width),
      artifact: PathBuf::from(self.artifact),
    })
  }
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, RecordError> {
  DateTime::parse_from_rfc3339(text)
    .map(|t| t.with_timezone(&Utc))
    .map_err(|e| RecordError::Corrupt(format!("时间格式错误 '{}': {}", text, e)))
}

fn format_time(time: &DateTime<Utc>) -> String {
  time.to_rfc3339()
}

impl SqliteStore {
  pub fn open(db_path: impl AsRef<Path>) -> Result<Self, RecordError> {
    let conn = Connection::open(db_path.as_ref())?;
    info!("打开数据库: {}", db_path.as_ref().display());
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, RecordError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, RecordError> {
    let store = Self { conn };
    store.ensure_schema()?;
    Ok(store)
  }

  fn ensure_schema(&self) -> Result<(), RecordError> {
    self.conn.execute_batch(
      r#"
      PRAGMA foreign_keys = ON;

      CREATE TABLE IF NOT EXISTS inventory (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        location TEXT NOT NULL,
        asset_type TEXT NOT NULL CHECK (asset_type IN ('bridge', 'road')),
        built_year INTEGER NOT NULL,
        last_inspection TEXT
      );

      CREATE TABLE IF NOT EXISTS inspections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        inventory_id INTEGER NOT NULL REFERENCES inventory(id),
        date TEXT NOT NULL,
        defects_json TEXT NOT NULL,
        severity TEXT,
        length REAL NOT NULL,
        width REAL NOT NULL,
        artifact_path TEXT NOT NULL
      );

      CREATE INDEX IF NOT EXISTS idx_inspections_inventory ON inspections(inventory_id);
      "#,
    )?;
    Ok(())
  }

  /// 新增资产，校验失败时不写入
  pub fn add_asset(&mut self, asset: NewAsset) -> Result<InventoryAsset, RecordError> {
    asset.validate()?;
    self.conn.execute(
      "INSERT INTO inventory (name, location, asset_type, built_year) VALUES (?1, ?2, ?3, ?4)",
      params![
        asset.name.trim(),
        asset.location.trim(),
        asset.asset_type.as_str(),
        asset.built_year
      ],
    )?;
    let id = self.conn.last_insert_rowid();
    info!("新增资产 {}: {} ({})", id, asset.name.trim(), asset.asset_type);

    self
      .get(id)?
      .ok_or_else(|| RecordError::Corrupt(format!("新增的资产 {} 无法读取", id)))
  }
}

impl Inventory for SqliteStore {
  fn get(&self, id: i64) -> Result<Option<InventoryAsset>, RecordError> {
    let row = self
      .conn
      .query_row(
        &format!("SELECT {} FROM inventory WHERE id = ?1", ASSET_COLUMNS),
        params![id],
        AssetRow::read,
      )
      .optional()?;
    row.map(AssetRow::into_asset).transpose()
  }

  fn list(&self) -> Result<Vec<InventoryAsset>, RecordError> {
    let mut stmt = self
      .conn
      .prepare(&format!("SELECT {} FROM inventory ORDER BY id", ASSET_COLUMNS))?;
    let rows = stmt.query_map([], AssetRow::read)?;
    rows
      .map(|row| row.map_err(RecordError::from).and_then(AssetRow::into_asset))
      .collect()
  }

  fn update_last_inspection(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), RecordError> {
    let changed = self.conn.execute(
      "UPDATE inventory SET last_inspection = ?1 WHERE id = ?2",
      params![format_time(&at), id],
    )?;
    if changed == 0 {
      return Err(RecordError::AssetNotFound(id));
    }
    Ok(())
  }
}

impl InspectionStore for SqliteStore {
  fn commit_inspection(
    &mut self,
    inspection: NewInspection,
  ) -> Result<InspectionRecord, RecordError> {
    let defects_json = serde_json::to_string(&inspection.defects)?;
    let date = format_time(&inspection.date);

    let tx = self.conn.transaction()?;
    let exists = tx
      .query_row(
        "SELECT 1 FROM inventory WHERE id = ?1",
        params![inspection.asset_id],
        |_| Ok(()),
      )
      .optional()?
      .is_some();
    if !exists {
      // tx 在这里被丢弃并回滚
      return Err(RecordError::AssetNotFound(inspection.asset_id));
    }

    tx.execute(
      "INSERT INTO inspections \
       (inventory_id, date, defects_json, severity, length, width, artifact_path) \
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        inspection.asset_id,
        date,
        defects_json,
        inspection.severity,
        inspection.measurements.length,
        inspection.measurements.width,
        inspection.artifact.to_string_lossy().into_owned(),
      ],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
      "UPDATE inventory SET last_inspection = ?1 WHERE id = ?2",
      params![date, inspection.asset_id],
    )?;
    tx.commit()?;
    debug!("巡检记录 {} 已提交", id);

    Ok(InspectionRecord {
      id,
      asset_id: inspection.asset_id,
      date: parse_time(&date)?,
      defects: inspection.defects,
      severity: inspection.severity,
      measurements: inspection.measurements,
      artifact: inspection.artifact,
    })
  }

  fn inspection(&self, id: i64) -> Result<Option<InspectionRecord>, RecordError> {
    let row = self
      .conn
      .query_row(
        &format!("SELECT {} FROM inspections WHERE id = ?1", INSPECTION_COLUMNS),
        params![id],
        InspectionRow::read,
      )
      .optional()?;
    row.map(InspectionRow::into_record).transpose()
  }

  fn inspections_for(&self, asset_id: i64) -> Result<Vec<InspectionRecord>, RecordError> {
    let mut stmt = self.conn.prepare(&format!(
      "SELECT {} FROM inspections WHERE inventory_id = ?1 ORDER BY date, id",
      INSPECTION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![asset_id], InspectionRow::read)?;
    rows
      .map(|row| row.map_err(RecordError::from).and_then(InspectionRow::into_record))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::AssetType;

  fn new_asset(name: &str, asset_type: AssetType) -> NewAsset {
    NewAsset {
      name: name.to_string(),
      location: "Ring Road".to_string(),
      asset_type,
      built_year: 1985,
    }
  }

  #[test]
  fn assets_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("terminus.db");
    {
      let mut store = SqliteStore::open(&db).unwrap();
      store.add_asset(new_asset("North Bridge", AssetType::Bridge)).unwrap();
      store.add_asset(new_asset("  Ring Road  ", AssetType::Road)).unwrap();
    }

    let store = SqliteStore::open(&db).unwrap();
    let assets = store.list().unwrap();
    assert_eq!(assets.len(), 2);
    assert_eq!(assets[0].name, "North Bridge");
    assert_eq!(assets[1].name, "Ring Road");
    assert_eq!(assets[1].asset_type, AssetType::Road);
    assert!(assets.iter().all(|a| a.last_inspection.is_none()));
  }

  #[test]
  fn invalid_asset_is_not_stored() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let mut asset = new_asset("", AssetType::Bridge);
    assert!(matches!(store.add_asset(asset.clone()), Err(RecordError::InvalidAsset(_))));
    asset.name = "Old Mill Bridge".to_string();
    asset.built_year = -4;
    assert!(matches!(store.add_asset(asset), Err(RecordError::InvalidAsset(_))));
    assert!(store.list().unwrap().is_empty());
  }

  #[test]
  fn commit_preserves_defect_order_and_duplicates() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let asset = store.add_asset(new_asset("East Bridge", AssetType::Bridge)).unwrap();
    let date = DateTime::parse_from_rfc3339("2026-03-01T08:30:00Z")
      .unwrap()
      .with_timezone(&Utc);

    let record = store
      .commit_inspection(NewInspection {
        asset_id: asset.id,
        date,
        defects: vec!["crack".into(), "rebar exposure".into(), "crack".into()],
        severity: None,
        measurements: Measurements::new(4.0, 0.5),
        artifact: PathBuf::from("/data/east.mp4"),
      })
      .unwrap();

    let loaded = store.inspections_for(asset.id).unwrap();
    assert_eq!(loaded, vec![record]);
    assert_eq!(loaded[0].defects, vec!["crack", "rebar exposure", "crack"]);
    assert_eq!(store.get(asset.id).unwrap().unwrap().last_inspection, Some(date));
  }

  #[test]
  fn commit_for_missing_asset_rolls_back() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let result = store.commit_inspection(NewInspection {
      asset_id: 42,
      date: Utc::now(),
      defects: vec!["pothole".into()],
      severity: Some("high".into()),
      measurements: Measurements::default(),
      artifact: PathBuf::from("/data/x.jpg"),
    });
    assert!(matches!(result, Err(RecordError::AssetNotFound(42))));
    assert!(store.inspections_for(42).unwrap().is_empty());
    assert!(matches!(
      store.update_last_inspection(42, Utc::now()),
      Err(RecordError::AssetNotFound(42))
    ));
  }
}
