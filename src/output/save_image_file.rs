// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::{OutputError, OutputWriter};
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

/// 保存最后一帧标注图像
pub struct SaveImageFileOutput {
  path: PathBuf,
  written: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(url_file_path(uri)))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      written: false,
    }
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    Ok(())
  }
}

impl OutputWriter for SaveImageFileOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    self.save_image(image)?;
    self.written = true;
    Ok(())
  }

  fn finish(&mut self) -> Result<Option<PathBuf>, OutputError> {
    if !self.written {
      return Ok(None);
    }
    info!("保存图像到文件: {}", self.path.display());
    Ok(Some(self.path.clone()))
  }

  fn abort(&mut self) {
    if self.written {
      if let Err(e) = std::fs::remove_file(&self.path) {
        warn!("删除未完成的图像失败: {}", e);
      }
      self.written = false;
    }
  }
}
