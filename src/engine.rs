// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/engine.rs - 多模型检测引擎
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  filter::filter_detections,
  frame::Frame,
  model::{DetectionModel, ModelError},
  output::draw::Draw,
};

/// 用户选择的模型与缺陷类别
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
  pub models: Vec<String>,
  pub classes: BTreeSet<String>,
}

impl Selection {
  pub fn new(
    models: impl IntoIterator<Item = impl Into<String>>,
    classes: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Self {
      models: models.into_iter().map(Into::into).collect(),
      classes: classes.into_iter().map(Into::into).collect(),
    }
  }
}

/// 某个模型在当前帧推理失败，其余模型的结果仍然有效
#[derive(Error, Debug)]
#[error("模型 {model_id} 推理失败: {error}")]
pub struct PartialInferenceFailure {
  pub model_id: String,
  #[source]
  pub error: ModelError,
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("未配置的模型: {0}")]
  UnknownModel(String),
}

/// 单帧检测结果
#[derive(Debug)]
pub struct FrameOutcome {
  /// 叠加了所有模型检测框的图像
  pub annotated: RgbImage,
  /// 按模型顺序、模型内按检测顺序拼接的缺陷类别
  pub labels: Vec<String>,
  pub failures: Vec<PartialInferenceFailure>,
}

/// 依次调用所有模型，过滤后叠加绘制到同一张图上
///
/// 模型列表为空时返回原图副本与空标签列表。
pub fn run_models(
  frame: &Frame,
  models: &[&dyn DetectionModel],
  classes: &BTreeSet<String>,
  draw: &Draw,
) -> FrameOutcome {
  let mut annotated = frame.image.clone();
  let mut labels = Vec::new();
  let mut failures = Vec::new();

  for model in models {
    match model.infer(frame) {
      Ok(detections) => {
        let total = detections.len();
        let passed = filter_detections(detections, classes);
        debug!(
          "帧 {} 模型 {}: {} 个检测结果, {} 个通过过滤",
          frame.index,
          model.id(),
          total,
          passed.len()
        );
        labels.extend(draw.annotate_in_place(&mut annotated, &passed));
      }
      Err(error) => {
        warn!("帧 {} 模型 {} 推理失败: {}", frame.index, model.id(), error);
        failures.push(PartialInferenceFailure {
          model_id: model.id().to_string(),
          error,
        });
      }
    }
  }

  FrameOutcome {
    annotated,
    labels,
    failures,
  }
}

/// 检测引擎，持有所有已加载的模型
pub struct DetectionEngine {
  models: Vec<Box<dyn DetectionModel>>,
  draw: Draw<'static>,
}

impl DetectionEngine {
  pub fn new(models: Vec<Box<dyn DetectionModel>>) -> Self {
    Self {
      models,
      draw: Draw::default(),
    }
  }

  pub fn model_ids(&self) -> Vec<&str> {
    self.models.iter().map(|m| m.id()).collect()
  }

  /// 所有模型类别的并集
  pub fn vocabulary(&self) -> BTreeSet<String> {
    self
      .models
      .iter()
      .flat_map(|m| m.known_classes())
      .collect()
  }

  /// 按配置顺序取出被选中的模型
  pub fn select(&self, ids: &[String]) -> Result<Vec<&dyn DetectionModel>, EngineError> {
    let configured = |id: &&String| self.models.iter().any(|m| m.id() == id.as_str());
    if let Some(unknown) = ids.iter().find(|id| !configured(id)) {
      return Err(EngineError::UnknownModel(unknown.clone()));
    }
    Ok(
      self
        .models
        .iter()
        .filter(|m| ids.iter().any(|id| id == m.id()))
        .map(|m| m.as_ref())
        .collect(),
    )
  }

  pub fn run(&self, frame: &Frame, selection: &Selection) -> Result<FrameOutcome, EngineError> {
    let models = self.select(&selection.models)?;
    Ok(run_models(frame, &models, &selection.classes, &self.draw))
  }
}
