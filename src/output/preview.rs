// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/output/preview.rs - 实时预览输出
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

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbImage;

use super::{OutputError, OutputWriter};
use crate::FromUrlWithScheme;

#[derive(Default)]
struct SlotState {
  latest: Option<RgbImage>,
  published: u64,
}

/// 预览画面的共享槽位，界面层从这里读取最新一帧
#[derive(Clone, Default)]
pub struct PreviewSlot {
  inner: Arc<Mutex<SlotState>>,
}

impl PreviewSlot {
  fn state(&self) -> MutexGuard<'_, SlotState> {
    self
      .inner
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn latest(&self) -> Option<RgbImage> {
    self.state().latest.clone()
  }

  /// 已发布的帧数
  pub fn published(&self) -> u64 {
    self.state().published
  }

  fn publish(&self, image: &RgbImage) {
    let mut state = self.state();
    state.latest = Some(image.clone());
    state.published += 1;
  }
}

/// 只保留最新一帧，不生成文件
#[derive(Default)]
pub struct PreviewOutput {
  slot: PreviewSlot,
}

impl PreviewOutput {
  pub fn with_slot(slot: PreviewSlot) -> Self {
    Self { slot }
  }

  pub fn slot(&self) -> PreviewSlot {
    self.slot.clone()
  }
}

impl FromUrlWithScheme for PreviewOutput {
  const SCHEME: &'static str = "preview";
}

impl crate::FromUrl for PreviewOutput {
  type Error = OutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl OutputWriter for PreviewOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    self.slot.publish(image);
    Ok(())
  }

  fn finish(&mut self) -> Result<Option<PathBuf>, OutputError> {
    Ok(None)
  }

  fn abort(&mut self) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn latest_frame_is_visible_through_shared_slot() {
    let slot = PreviewSlot::default();
    let mut output = PreviewOutput::with_slot(slot.clone());
    assert!(slot.latest().is_none());

    output.write_frame(&RgbImage::new(2, 2)).unwrap();
    output.write_frame(&RgbImage::new(3, 3)).unwrap();

    assert_eq!(slot.published(), 2);
    assert_eq!(slot.latest().unwrap().dimensions(), (3, 3));
    assert_eq!(output.finish().unwrap(), None);
  }
}
