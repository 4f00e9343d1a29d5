// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/record.rs - 资产台账与巡检记录
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

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::session::FinishedSession;

mod sqlite;
pub use self::sqlite::SqliteStore;

/// 资产类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
  Bridge,
  Road,
}

impl AssetType {
  pub fn as_str(&self) -> &'static str {
    match self {
      AssetType::Bridge => "bridge",
      AssetType::Road => "road",
    }
  }
}

impl fmt::Display for AssetType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AssetType {
  type Err = RecordError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "bridge" => Ok(AssetType::Bridge),
      "road" => Ok(AssetType::Road),
      other => Err(RecordError::InvalidAsset(format!("未知的资产类型: {}", other))),
    }
  }
}

/// 台账中的一项资产（桥梁或道路）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryAsset {
  pub id: i64,
  pub name: String,
  pub location: String,
  pub asset_type: AssetType,
  pub built_year: i32,
  pub last_inspection: Option<DateTime<Utc>>,
}

/// 新增资产的输入
#[derive(Debug, Clone, PartialEq)]
pub struct NewAsset {
  pub name: String,
  pub location: String,
  pub asset_type: AssetType,
  pub built_year: i32,
}

impl NewAsset {
  /// 名称不能为空，建成年份必须为正且不晚于今年
  pub fn validate(&self) -> Result<(), RecordError> {
    if self.name.trim().is_empty() {
      return Err(RecordError::InvalidAsset("名称不能为空".to_string()));
    }
    let current_year = Utc::now().year();
    if self.built_year <= 0 || self.built_year > current_year {
      return Err(RecordError::InvalidAsset(format!(
        "建成年份 {} 不在 [1, {}] 范围内",
        self.built_year, current_year
      )));
    }
    Ok(())
  }
}

/// 现场测量值（米）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Measurements {
  pub length: f64,
  pub width: f64,
}

impl Measurements {
  pub fn new(length: f64, width: f64) -> Self {
    Self { length, width }
  }

  pub fn area(&self) -> f64 {
    self.length * self.width
  }

  pub fn validate(&self) -> Result<(), RecordError> {
    for (name, value) in [("长度", self.length), ("宽度", self.width)] {
      if !value.is_finite() || value < 0.0 {
        return Err(RecordError::InvalidMeasurement(format!("{} 无效: {}", name, value)));
      }
    }
    Ok(())
  }
}

/// 一次完成的巡检，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectionRecord {
  pub id: i64,
  pub asset_id: i64,
  pub date: DateTime<Utc>,
  /// 按检测顺序排列的缺陷类别，允许重复
  pub defects: Vec<String>,
  pub severity: Option<String>,
  pub measurements: Measurements,
  /// 标注后的图像或视频
  pub artifact: PathBuf,
}

/// 待写入的巡检记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewInspection {
  pub asset_id: i64,
  pub date: DateTime<Utc>,
  pub defects: Vec<String>,
  pub severity: Option<String>,
  pub measurements: Measurements,
  pub artifact: PathBuf,
}

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("资产不存在: {0}")]
  AssetNotFound(i64),
  #[error("资产信息无效: {0}")]
  InvalidAsset(String),
  #[error("测量值无效: {0}")]
  InvalidMeasurement(String),
  #[error("数据库错误: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("数据损坏: {0}")]
  Corrupt(String),
}

/// 资产台账
pub trait Inventory {
  fn get(&self, id: i64) -> Result<Option<InventoryAsset>, RecordError>;

  fn list(&self) -> Result<Vec<InventoryAsset>, RecordError>;

  fn update_last_inspection(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), RecordError>;
}

/// 巡检记录存储
pub trait InspectionStore: Inventory {
  /// 写入记录并更新资产的最近巡检时间，两者要么都生效，要么都不生效
  ///
  /// 资产不存在时返回 [`RecordError::AssetNotFound`]，不写入任何内容。
  fn commit_inspection(
    &mut self,
    inspection: NewInspection,
  ) -> Result<InspectionRecord, RecordError>;

  fn inspection(&self, id: i64) -> Result<Option<InspectionRecord>, RecordError>;

  /// 某资产的全部巡检记录，按时间先后排列
  fn inspections_for(&self, asset_id: i64) -> Result<Vec<InspectionRecord>, RecordError>;
}

/// 由已结束的会话生成巡检记录并保存
///
/// 资产不存在或测量值无效时返回错误，存储不发生任何变化。
pub fn finalize<S: InspectionStore + ?Sized>(
  store: &mut S,
  session: FinishedSession,
  asset_id: i64,
  measurements: Measurements,
  severity: Option<String>,
  artifact: impl Into<PathBuf>,
) -> Result<InspectionRecord, RecordError> {
  if store.get(asset_id)?.is_none() {
    return Err(RecordError::AssetNotFound(asset_id));
  }
  measurements.validate()?;

  let severity = severity
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty());
  let record = store.commit_inspection(NewInspection {
    asset_id,
    date: session.finished_at(),
    defects: session.labels().to_vec(),
    severity,
    measurements,
    artifact: artifact.into(),
  })?;

  info!(
    "巡检记录 {} 已保存: 资产 {}, {} 个缺陷",
    record.id,
    record.asset_id,
    record.defects.len()
  );
  Ok(record)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::tests::FixedModel;
  use crate::engine::{DetectionEngine, Selection};
  use crate::session::PipelineSession;

  fn finished_session(labels: &[&str]) -> FinishedSession {
    let engine = DetectionEngine::new(vec![FixedModel::boxed("bridge", &[])]);
    let mut session = PipelineSession::new(&engine, Selection::new(["bridge"], ["crack"])).unwrap();
    session.record_frame(0, labels.iter().map(|s| s.to_string()).collect(), Vec::new());
    session.finish()
  }

  fn store_with_bridge() -> (SqliteStore, InventoryAsset) {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let asset = store
      .add_asset(NewAsset {
        name: "Harbour Bridge".to_string(),
        location: "Pier 4".to_string(),
        asset_type: AssetType::Bridge,
        built_year: 1932,
      })
      .unwrap();
    (store, asset)
  }

  #[test]
  fn asset_type_parses_case_insensitively() {
    assert_eq!("Bridge".parse::<AssetType>().unwrap(), AssetType::Bridge);
    assert_eq!(" road ".parse::<AssetType>().unwrap(), AssetType::Road);
    assert!("tunnel".parse::<AssetType>().is_err());
  }

  #[test]
  fn built_year_must_not_be_in_the_future() {
    let asset = |built_year| NewAsset {
      name: "A1".to_string(),
      location: "km 12".to_string(),
      asset_type: AssetType::Road,
      built_year,
    };
    assert!(asset(1998).validate().is_ok());
    assert!(asset(0).validate().is_err());
    assert!(asset(Utc::now().year() + 1).validate().is_err());
  }

  #[test]
  fn finalize_persists_record_and_updates_asset() {
    let (mut store, asset) = store_with_bridge();
    let session = finished_session(&["crack", "spalling", "crack"]);
    let date = session.finished_at();

    let record = finalize(
      &mut store,
      session,
      asset.id,
      Measurements::new(12.5, 3.0),
      Some(" moderate ".to_string()),
      "/data/annotated.jpg",
    )
    .unwrap();

    assert_eq!(record.defects, vec!["crack", "spalling", "crack"]);
    assert_eq!(record.severity.as_deref(), Some("moderate"));
    assert_eq!(record.measurements.area(), 37.5);
    assert_eq!(store.inspection(record.id).unwrap(), Some(record.clone()));

    let updated = store.get(asset.id).unwrap().unwrap();
    assert_eq!(updated.last_inspection, Some(date));
  }

  #[test]
  fn finalize_with_unknown_asset_changes_nothing() {
    let (mut store, asset) = store_with_bridge();
    let result = finalize(
      &mut store,
      finished_session(&["crack"]),
      asset.id + 100,
      Measurements::new(1.0, 1.0),
      None,
      "/data/annotated.jpg",
    );

    assert!(matches!(result, Err(RecordError::AssetNotFound(id)) if id == asset.id + 100));
    assert!(store.inspections_for(asset.id + 100).unwrap().is_empty());
    assert!(store.inspections_for(asset.id).unwrap().is_empty());
    assert_eq!(store.get(asset.id).unwrap().unwrap().last_inspection, None);
  }

  #[test]
  fn finalize_rejects_negative_measurements() {
    let (mut store, asset) = store_with_bridge();
    let result = finalize(
      &mut store,
      finished_session(&[]),
      asset.id,
      Measurements::new(-1.0, f64::NAN),
      None,
      "/data/annotated.jpg",
    );
    assert!(matches!(result, Err(RecordError::InvalidMeasurement(_))));
    assert!(store.inspections_for(asset.id).unwrap().is_empty());
  }
}
