// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/input/frame_folder.rs - 图像序列输入
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

//! 目录中的图像按文件名排序后作为视频帧依次输出。
//!
//! URL 格式：`folder:///path/to/frames?fps=10`
//!
//! 单个文件解码失败时产出 [`FramePull::Skipped`]，帧索引仍按文件位置递增。

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{info, warn};
use url::Url;

use super::{FramePull, InputError, InputSource, expect_scheme};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_param, url_file_path};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub struct FrameFolderInput {
  files: Vec<PathBuf>,
  cursor: usize,
  fps: Option<f64>,
}

impl FrameFolderInput {
  /// 列出目录中的图像文件
  pub fn open(dir: impl AsRef<Path>, fps: Option<f64>) -> Result<Self, InputError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
      .map_err(|e| InputError::SourceUnavailable(format!("{}: {}", dir.display(), e)))?;

    let mut files = Vec::new();
    for entry in entries {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    files.sort();
    info!("图像序列: {} 个文件 ({})", files.len(), dir.display());

    Ok(Self {
      files,
      cursor: 0,
      fps,
    })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl FromUrlWithScheme for FrameFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FrameFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    expect_scheme(url, Self::SCHEME)?;

    let fps = query_param(url, "fps")
      .map(|v| {
        v.parse::<f64>()
          .ok()
          .filter(|fps| *fps > 0.0)
          .ok_or_else(|| InputError::Config(format!("fps 无效: {}", v)))
      })
      .transpose()?;
    Self::open(url_file_path(url), fps)
  }
}

impl InputSource for FrameFolderInput {
  fn next_frame(&mut self) -> Result<FramePull, InputError> {
    let Some(path) = self.files.get(self.cursor) else {
      return Ok(FramePull::End);
    };
    let index = self.cursor as u64;
    self.cursor += 1;

    let decoded = ImageReader::open(path)
      .map_err(|e| e.to_string())
      .and_then(|reader| reader.with_guessed_format().map_err(|e| e.to_string()))
      .and_then(|reader| reader.decode().map_err(|e| e.to_string()));

    match decoded {
      Ok(image) => {
        let timestamp_ms = self
          .fps
          .map(|fps| (index as f64 * 1000.0 / fps) as u64)
          .unwrap_or(0);
        Ok(FramePull::Frame(Frame::new(image.into_rgb8(), index, timestamp_ms)))
      }
      Err(e) => {
        warn!("跳过无法解码的帧 {}: {}", path.display(), e);
        Ok(FramePull::Skipped(InputError::Decode(format!(
          "{}: {}",
          path.display(),
          e
        ))))
      }
    }
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    self.cursor = 0;
    Ok(())
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn frames_follow_file_name_order_and_skip_corrupt_files() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(4, 4).save(dir.path().join("002.png")).unwrap();
    RgbImage::new(4, 4).save(dir.path().join("000.png")).unwrap();
    std::fs::write(dir.path().join("001.png"), b"not a png").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let mut input = FrameFolderInput::open(dir.path(), Some(10.0)).unwrap();
    assert_eq!(input.len(), 3);

    assert!(matches!(input.next_frame(), Ok(FramePull::Frame(f)) if f.index == 0));
    assert!(matches!(
      input.next_frame(),
      Ok(FramePull::Skipped(InputError::Decode(_)))
    ));
    assert!(matches!(
      input.next_frame(),
      Ok(FramePull::Frame(f)) if f.index == 2 && f.timestamp_ms == 200
    ));
    assert!(matches!(input.next_frame(), Ok(FramePull::End)));

    input.rewind().unwrap();
    assert!(matches!(input.next_frame(), Ok(FramePull::Frame(f)) if f.index == 0));
  }

  #[test]
  fn missing_directory_is_unavailable() {
    let url = Url::parse("folder:///nonexistent/terminus/frames").unwrap();
    assert!(matches!(
      FrameFolderInput::from_url(&url),
      Err(InputError::SourceUnavailable(_))
    ));
  }
}
