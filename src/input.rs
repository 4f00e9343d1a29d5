// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[cfg(feature = "video_input")]
mod ffmpeg_video;
mod frame_folder;
mod image_file;
#[cfg(feature = "v4l2_input")]
mod v4l2_camera;

#[cfg(feature = "video_input")]
pub use self::ffmpeg_video::VideoFileInput;
pub use self::frame_folder::FrameFolderInput;
pub use self::image_file::ImageFileInput;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_camera::V4l2CameraInput;

/// 一次拉取的结果
#[derive(Debug)]
pub enum FramePull {
  Frame(Frame),
  /// 当前帧无法解码，可以继续拉取后续帧
  Skipped(InputError),
  /// 暂时没有新帧（例如摄像头超时）
  Pending,
  /// 有限输入源已经结束
  End,
}

/// 输入源
///
/// `next_frame` 返回 `Err` 表示输入源已不可用，调用方应当停止拉取。
pub trait InputSource {
  fn next_frame(&mut self) -> Result<FramePull, InputError>;

  /// 回到第一帧，不支持重新开始的输入源返回错误
  fn rewind(&mut self) -> Result<(), InputError> {
    Err(InputError::NotRestartable)
  }

  /// 输入源的帧率（如果已知）
  fn fps(&self) -> Option<f64> {
    None
  }
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
  fn next_frame(&mut self) -> Result<FramePull, InputError> {
    (**self).next_frame()
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    (**self).rewind()
  }

  fn fps(&self) -> Option<f64> {
    (**self).fps()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("输入源不可用: {0}")]
  SourceUnavailable(String),
  #[error("帧解码错误: {0}")]
  Decode(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("输入源不支持重新开始")]
  NotRestartable,
  #[error("参数错误: {0}")]
  Config(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  FrameFolder(FrameFolderInput),
  #[cfg(feature = "video_input")]
  VideoFile(VideoFileInput),
  #[cfg(feature = "v4l2_input")]
  Camera(V4l2CameraInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      FrameFolderInput::SCHEME => Ok(InputWrapper::FrameFolder(FrameFolderInput::from_url(url)?)),
      #[cfg(feature = "video_input")]
      VideoFileInput::SCHEME => Ok(InputWrapper::VideoFile(VideoFileInput::from_url(url)?)),
      #[cfg(not(feature = "video_input"))]
      "video" => Err(InputError::Config("未启用 video_input 功能".to_string())),
      #[cfg(feature = "v4l2_input")]
      V4l2CameraInput::SCHEME => Ok(InputWrapper::Camera(V4l2CameraInput::from_url(url)?)),
      #[cfg(not(feature = "v4l2_input"))]
      "camera" => Err(InputError::Config("未启用 v4l2_input 功能".to_string())),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InputSource for InputWrapper {
  fn next_frame(&mut self) -> Result<FramePull, InputError> {
    match self {
      InputWrapper::ImageFile(input) => input.next_frame(),
      InputWrapper::FrameFolder(input) => input.next_frame(),
      #[cfg(feature = "video_input")]
      InputWrapper::VideoFile(input) => input.next_frame(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::Camera(input) => input.next_frame(),
    }
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    match self {
      InputWrapper::ImageFile(input) => input.rewind(),
      InputWrapper::FrameFolder(input) => input.rewind(),
      #[cfg(feature = "video_input")]
      InputWrapper::VideoFile(input) => input.rewind(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::Camera(input) => input.rewind(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      InputWrapper::ImageFile(input) => input.fps(),
      InputWrapper::FrameFolder(input) => input.fps(),
      #[cfg(feature = "video_input")]
      InputWrapper::VideoFile(input) => input.fps(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::Camera(input) => input.fps(),
    }
  }
}

/// 检查 URL 方案
pub(crate) fn expect_scheme(url: &Url, scheme: &str) -> Result<(), InputError> {
  if url.scheme() != scheme {
    return Err(InputError::SchemeMismatch(format!(
      "期望 '{}', 实际 '{}'",
      scheme,
      url.scheme()
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }

  #[test]
  fn missing_image_is_unavailable() {
    let url = Url::parse("image:///nonexistent/terminus/deck.jpg").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SourceUnavailable(_))
    ));
  }
}
