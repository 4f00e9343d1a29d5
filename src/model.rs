// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/model.rs - 检测模型适配器
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

use std::collections::BTreeSet;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame, query_param, url_file_path};

/// 检测模型适配器
///
/// 适配器只负责调用模型并如实返回结果，不做类别过滤。
/// 无法调用模型时必须返回错误，不能静默丢弃部分结果。
pub trait DetectionModel {
  /// 模型标识，用于日志与失败报告
  fn id(&self) -> &str;

  /// 模型能够输出的全部类别名称
  fn known_classes(&self) -> BTreeSet<String>;

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError>;
}

impl<M: DetectionModel + ?Sized> DetectionModel for Box<M> {
  fn id(&self) -> &str {
    (**self).id()
  }

  fn known_classes(&self) -> BTreeSet<String> {
    (**self).known_classes()
  }

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    (**self).infer(frame)
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  pub label: String,
  pub confidence: f32,
  pub model_id: String,
}

impl Detection {
  /// 创建检测结果，交换颠倒的角点并将置信度限制在 [0, 1]
  pub fn new(
    model_id: impl Into<String>,
    label: impl Into<String>,
    confidence: f32,
    bbox: [f32; 4],
  ) -> Self {
    let [x1, y1, x2, y2] = bbox;
    let confidence = if confidence.is_nan() {
      0.0
    } else {
      confidence.clamp(0.0, 1.0)
    };
    Self {
      bbox: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
      label: label.into(),
      confidence,
      model_id: model_id.into(),
    }
  }

  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型不可用: {0}")]
  Unavailable(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("模型配置错误: {0}")]
  Config(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

mod recorded;
pub use self::recorded::{RecordedDetection, RecordedModel};

#[cfg(feature = "model_yolo")]
mod yolo;
#[cfg(feature = "model_yolo")]
pub use self::yolo::{YoloModel, YoloModelBuilder};

/// 通过 URL 构造的模型
pub enum ModelWrapper {
  #[cfg(feature = "model_yolo")]
  Yolo(YoloModel),
  Recorded(RecordedModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_yolo")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == YoloModelBuilder::SCHEME {
        let model = YoloModelBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Yolo(model));
      }
    }
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RecordedModel::SCHEME {
        return Ok(ModelWrapper::Recorded(RecordedModel::from_url(url)?));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl DetectionModel for ModelWrapper {
  fn id(&self) -> &str {
    match self {
      #[cfg(feature = "model_yolo")]
      ModelWrapper::Yolo(model) => model.id(),
      ModelWrapper::Recorded(model) => model.id(),
    }
  }

  fn known_classes(&self) -> BTreeSet<String> {
    match self {
      #[cfg(feature = "model_yolo")]
      ModelWrapper::Yolo(model) => model.known_classes(),
      ModelWrapper::Recorded(model) => model.known_classes(),
    }
  }

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    match self {
      #[cfg(feature = "model_yolo")]
      ModelWrapper::Yolo(model) => model.infer(frame),
      ModelWrapper::Recorded(model) => model.infer(frame),
    }
  }
}

/// 模型标识：优先使用 `id` 参数，否则取文件名（不含扩展名）
pub(crate) fn model_id_from_url(url: &Url) -> String {
  query_param(url, "id").unwrap_or_else(|| {
    url_file_path(url)
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| url.scheme().to_string())
  })
}

/// 类别表：`labels` 指向每行一个类别名的文件，`classes` 为逗号分隔的列表
pub(crate) fn class_names_from_url(url: &Url) -> Result<Vec<String>, ModelError> {
  if let Some(path) = query_param(url, "labels") {
    let text = std::fs::read_to_string(&path)?;
    return Ok(parse_class_names(&text, '\n'));
  }
  Ok(
    query_param(url, "classes")
      .map(|list| parse_class_names(&list, ','))
      .unwrap_or_default(),
  )
}

fn parse_class_names(text: &str, separator: char) -> Vec<String> {
  text
    .split(separator)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detection_normalises_corners_and_confidence() {
    let det = Detection::new("m", "crack", 1.7, [50.0, 40.0, 10.0, 20.0]);
    assert_eq!(det.bbox, [10.0, 20.0, 50.0, 40.0]);
    assert_eq!(det.confidence, 1.0);
    assert_eq!(det.width(), 40.0);
    assert_eq!(det.height(), 20.0);

    let det = Detection::new("m", "crack", f32::NAN, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(det.confidence, 0.0);
  }

  #[test]
  fn class_names_from_query() {
    let url = Url::parse("recorded:///tmp/x.jsonl?classes=crack,%20pothole,,spalling").unwrap();
    let names = class_names_from_url(&url).unwrap();
    assert_eq!(names, vec!["crack", "pothole", "spalling"]);
  }

  #[test]
  fn model_id_defaults_to_file_stem() {
    let url = Url::parse("yolo:///models/bridge.onnx").unwrap();
    assert_eq!(model_id_from_url(&url), "bridge");
    let url = Url::parse("yolo:///models/bridge.onnx?id=deck").unwrap();
    assert_eq!(model_id_from_url(&url), "deck");
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rknn:///models/a.rknn").unwrap();
    assert!(matches!(
      ModelWrapper::from_url(&url),
      Err(ModelError::SchemeMismatch(_))
    ));
  }
}
