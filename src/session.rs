// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/session.rs - 检测会话
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

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::{
  engine::{DetectionEngine, EngineError, PartialInferenceFailure, Selection},
  filter::unknown_classes,
  input::InputError,
  task::CancelToken,
};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("至少需要选择一个模型")]
  NoModelSelected,
  #[error(transparent)]
  Engine(#[from] EngineError),
}

/// 帧级别的非致命问题
#[derive(Debug)]
pub enum FrameIssue {
  /// 某个模型在该帧推理失败
  Inference {
    frame_index: u64,
    failure: PartialInferenceFailure,
  },
  /// 该帧无法解码，已跳过
  Skipped(InputError),
}

/// 一次检测运行的状态
///
/// 每次运行独占一个会话，运行结束后通过 [`PipelineSession::finish`] 冻结。
#[derive(Debug)]
pub struct PipelineSession {
  selection: Selection,
  labels: Vec<String>,
  frames_processed: u64,
  issues: Vec<FrameIssue>,
  cancel: CancelToken,
  started_at: DateTime<Utc>,
}

impl PipelineSession {
  /// 校验所选模型都已配置，类别不在任何模型类别表中时只给出警告
  pub fn new(engine: &DetectionEngine, selection: Selection) -> Result<Self, SessionError> {
    if selection.models.is_empty() {
      return Err(SessionError::NoModelSelected);
    }
    engine.select(&selection.models)?;

    let vocabulary = engine.vocabulary();
    for class in unknown_classes(&selection.classes, &vocabulary) {
      warn!("类别 {} 不在所选模型的类别表中", class);
    }
    if selection.classes.is_empty() {
      warn!("未选择任何缺陷类别，检测结果将全部被过滤");
    }

    Ok(Self {
      selection,
      labels: Vec::new(),
      frames_processed: 0,
      issues: Vec::new(),
      cancel: CancelToken::new(),
      started_at: Utc::now(),
    })
  }

  pub fn selection(&self) -> &Selection {
    &self.selection
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn frames_processed(&self) -> u64 {
    self.frames_processed
  }

  pub fn issues(&self) -> &[FrameIssue] {
    &self.issues
  }

  /// 取消令牌，可以克隆到其他线程（例如 Ctrl-C 处理函数）
  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub(crate) fn record_frame(
    &mut self,
    frame_index: u64,
    labels: Vec<String>,
    failures: Vec<PartialInferenceFailure>,
  ) {
    self.frames_processed += 1;
    self.labels.extend(labels);
    self.issues.extend(
      failures
        .into_iter()
        .map(|failure| FrameIssue::Inference {
          frame_index,
          failure,
        }),
    );
  }

  pub(crate) fn record_skip(&mut self, error: InputError) {
    self.issues.push(FrameIssue::Skipped(error));
  }

  pub fn finish(self) -> FinishedSession {
    FinishedSession {
      selection: self.selection,
      labels: self.labels,
      frames_processed: self.frames_processed,
      issues: self.issues,
      started_at: self.started_at,
      finished_at: Utc::now(),
    }
  }
}

/// 已结束的会话，只有它可以用来生成巡检记录
#[derive(Debug)]
pub struct FinishedSession {
  selection: Selection,
  labels: Vec<String>,
  frames_processed: u64,
  issues: Vec<FrameIssue>,
  started_at: DateTime<Utc>,
  finished_at: DateTime<Utc>,
}

impl FinishedSession {
  pub fn selection(&self) -> &Selection {
    &self.selection
  }

  /// 所有帧的缺陷类别，帧按输入顺序，帧内按模型与检测顺序
  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn frames_processed(&self) -> u64 {
    self.frames_processed
  }

  pub fn issues(&self) -> &[FrameIssue] {
    &self.issues
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  pub fn finished_at(&self) -> DateTime<Utc> {
    self.finished_at
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::tests::{BrokenModel, FixedModel};
  use crate::model::ModelError;

  fn engine() -> DetectionEngine {
    DetectionEngine::new(vec![
      FixedModel::boxed("bridge", &[("crack", [0.0; 4])]),
      Box::new(BrokenModel("road".to_string())),
    ])
  }

  #[test]
  fn model_selection_must_be_non_empty_and_known() {
    let engine = engine();
    assert!(matches!(
      PipelineSession::new(&engine, Selection::new(Vec::<String>::new(), ["crack"])),
      Err(SessionError::NoModelSelected)
    ));
    assert!(matches!(
      PipelineSession::new(&engine, Selection::new(["tunnel"], ["crack"])),
      Err(SessionError::Engine(EngineError::UnknownModel(_)))
    ));
    let no_classes = Selection::new(["bridge"], Vec::<String>::new());
    assert!(PipelineSession::new(&engine, no_classes).is_ok());
  }

  #[test]
  fn labels_accumulate_in_frame_order() {
    let engine = engine();
    let mut session =
      PipelineSession::new(&engine, Selection::new(["bridge", "road"], ["crack"])).unwrap();

    session.record_frame(0, vec!["crack".into(), "pothole".into()], Vec::new());
    session.record_skip(InputError::Decode("坏帧".into()));
    session.record_frame(
      2,
      vec!["crack".into()],
      vec![PartialInferenceFailure {
        model_id: "road".into(),
        error: ModelError::Inference("超时".into()),
      }],
    );

    let finished = session.finish();
    assert_eq!(finished.labels(), ["crack", "pothole", "crack"]);
    assert_eq!(finished.frames_processed(), 2);
    assert_eq!(finished.issues().len(), 2);
    assert!(matches!(
      &finished.issues()[1],
      FrameIssue::Inference { frame_index: 2, failure } if failure.model_id == "road"
    ));
    assert!(finished.finished_at() >= finished.started_at());
  }
}
