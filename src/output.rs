// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub mod draw;

mod preview;
mod save_image_file;
mod save_video_file;

pub use self::preview::{PreviewOutput, PreviewSlot};
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};
pub use self::save_video_file::{SaveVideoFileError, SaveVideoFileOutput};

/// 标注后的帧的去向
///
/// 任何写入错误都是致命的，调用方应当停止写入并调用 [`OutputWriter::abort`]。
pub trait OutputWriter {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;

  /// 完成输出，返回生成的文件路径（如果有）
  fn finish(&mut self) -> Result<Option<PathBuf>, OutputError>;

  /// 放弃输出并清理已经写入的内容
  fn abort(&mut self);

  /// 输入源的帧率，未指定帧率的输出可以据此编码
  fn hint_fps(&mut self, _fps: Option<f64>) {}
}

impl<O: OutputWriter + ?Sized> OutputWriter for Box<O> {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(image)
  }

  fn finish(&mut self) -> Result<Option<PathBuf>, OutputError> {
    (**self).finish()
  }

  fn abort(&mut self) {
    (**self).abort()
  }

  fn hint_fps(&mut self, fps: Option<f64>) {
    (**self).hint_fps(fps)
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("保存视频文件错误: {0}")]
  SaveVideoFileError(#[from] SaveVideoFileError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Preview(PreviewOutput),
  SaveImageFile(SaveImageFileOutput),
  SaveVideoFile(SaveVideoFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      PreviewOutput::SCHEME => Ok(OutputWrapper::Preview(PreviewOutput::default())),
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      SaveVideoFileOutput::SCHEME => Ok(OutputWrapper::SaveVideoFile(
        SaveVideoFileOutput::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputWriter for OutputWrapper {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Preview(output) => output.write_frame(image),
      OutputWrapper::SaveImageFile(output) => output.write_frame(image),
      OutputWrapper::SaveVideoFile(output) => output.write_frame(image),
    }
  }

  fn finish(&mut self) -> Result<Option<PathBuf>, OutputError> {
    match self {
      OutputWrapper::Preview(output) => output.finish(),
      OutputWrapper::SaveImageFile(output) => output.finish(),
      OutputWrapper::SaveVideoFile(output) => output.finish(),
    }
  }

  fn abort(&mut self) {
    match self {
      OutputWrapper::Preview(output) => output.abort(),
      OutputWrapper::SaveImageFile(output) => output.abort(),
      OutputWrapper::SaveVideoFile(output) => output.abort(),
    }
  }

  fn hint_fps(&mut self, fps: Option<f64>) {
    match self {
      OutputWrapper::Preview(output) => output.hint_fps(fps),
      OutputWrapper::SaveImageFile(output) => output.hint_fps(fps),
      OutputWrapper::SaveVideoFile(output) => output.hint_fps(fps),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn schemes_select_outputs() {
    let preview = OutputWrapper::from_url(&Url::parse("preview://").unwrap()).unwrap();
    assert!(matches!(preview, OutputWrapper::Preview(_)));

    let image = OutputWrapper::from_url(&Url::parse("image:///tmp/out.jpg").unwrap()).unwrap();
    assert!(matches!(image, OutputWrapper::SaveImageFile(_)));

    let video =
      OutputWrapper::from_url(&Url::parse("video:///tmp/out.mp4?fps=15").unwrap()).unwrap();
    assert!(matches!(video, OutputWrapper::SaveVideoFile(_)));

    assert!(matches!(
      OutputWrapper::from_url(&Url::parse("rtsp://host/live").unwrap()),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
