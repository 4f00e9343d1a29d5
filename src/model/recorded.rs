// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/model/recorded.rs - 回放已记录的检测结果
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

//! 回放模型：按帧索引返回 JSON Lines 文件中记录的检测结果。
//!
//! 每行一个对象：
//!
//! ```text
//! {"frame": 0, "label": "crack", "confidence": 0.91, "bbox": [12.0, 30.0, 220.0, 96.0]}
//! ```
//!
//! URL 格式：`recorded:///path/detections.jsonl?id=replay&classes=crack,pothole`

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{Detection, DetectionModel, ModelError, class_names_from_url, model_id_from_url};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedDetection {
  pub frame: u64,
  pub label: String,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

pub struct RecordedModel {
  id: String,
  classes: BTreeSet<String>,
  frames: BTreeMap<u64, Vec<RecordedDetection>>,
}

impl RecordedModel {
  pub fn new(
    id: impl Into<String>,
    classes: impl IntoIterator<Item = String>,
    records: impl IntoIterator<Item = RecordedDetection>,
  ) -> Self {
    let mut classes: BTreeSet<String> = classes.into_iter().collect();
    let mut frames: BTreeMap<u64, Vec<RecordedDetection>> = BTreeMap::new();
    for record in records {
      classes.insert(record.label.clone());
      frames.entry(record.frame).or_default().push(record);
    }
    Self {
      id: id.into(),
      classes,
      frames,
    }
  }

  /// 解析 JSON Lines 文本，空行忽略
  pub fn parse_records(text: &str) -> Result<Vec<RecordedDetection>, ModelError> {
    text
      .lines()
      .enumerate()
      .filter(|(_, line)| !line.trim().is_empty())
      .map(|(n, line)| {
        serde_json::from_str(line)
          .map_err(|e| ModelError::Config(format!("第 {} 行无法解析: {}", n + 1, e)))
      })
      .collect()
  }
}

impl FromUrlWithScheme for RecordedModel {
  const SCHEME: &'static str = "recorded";
}

impl FromUrl for RecordedModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = url_file_path(url);
    let text = std::fs::read_to_string(&path).map_err(|e| {
      ModelError::Unavailable(format!("无法读取检测记录 {}: {}", path.display(), e))
    })?;
    let records = Self::parse_records(&text)?;
    info!("加载检测记录: {} 条 ({})", records.len(), path.display());

    Ok(Self::new(
      model_id_from_url(url),
      class_names_from_url(url)?,
      records,
    ))
  }
}

impl DetectionModel for RecordedModel {
  fn id(&self) -> &str {
    &self.id
  }

  fn known_classes(&self) -> BTreeSet<String> {
    self.classes.clone()
  }

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    let detections: Vec<Detection> = self
      .frames
      .get(&frame.index)
      .map(|records| {
        records
          .iter()
          .map(|r| Detection::new(self.id.as_str(), r.label.as_str(), r.confidence, r.bbox))
          .collect()
      })
      .unwrap_or_default();
    debug!("回放第 {} 帧: {} 个检测结果", frame.index, detections.len());
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn replays_detections_by_frame_index() {
    let text = r#"
{"frame": 0, "label": "crack", "confidence": 0.9, "bbox": [1.0, 2.0, 10.0, 12.0]}
{"frame": 2, "label": "pothole", "confidence": 0.6, "bbox": [5.0, 5.0, 9.0, 9.0]}

{"frame": 2, "label": "crack", "confidence": 0.4, "bbox": [0.0, 0.0, 3.0, 3.0]}
"#;
    let records = RecordedModel::parse_records(text).unwrap();
    let model = RecordedModel::new("replay", vec!["spalling".to_string()], records);

    assert_eq!(model.id(), "replay");
    let classes: Vec<_> = model.known_classes().into_iter().collect();
    assert_eq!(classes, vec!["crack", "pothole", "spalling"]);

    let frame = |index| Frame::new(RgbImage::new(16, 16), index, 0);
    assert_eq!(model.infer(&frame(0)).unwrap().len(), 1);
    assert!(model.infer(&frame(1)).unwrap().is_empty());
    let labels: Vec<_> = model
      .infer(&frame(2))
      .unwrap()
      .into_iter()
      .map(|d| d.label)
      .collect();
    assert_eq!(labels, vec!["pothole", "crack"]);
  }

  #[test]
  fn malformed_line_reports_line_number() {
    let err = RecordedModel::parse_records("{\"frame\": 0}\n").unwrap_err();
    assert!(matches!(err, ModelError::Config(msg) if msg.contains("第 1 行")));
  }

  #[test]
  fn missing_file_is_unavailable() {
    let url = Url::parse("recorded:///nonexistent/terminus/detections.jsonl").unwrap();
    assert!(matches!(
      RecordedModel::from_url(&url),
      Err(ModelError::Unavailable(_))
    ));
  }
}
