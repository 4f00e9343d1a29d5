// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use tracing::info;
use url::Url;

use super::{FramePull, InputError, InputSource, expect_scheme};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

/// 单张图像，产出一帧后结束
pub struct ImageFileInput {
  image: RgbImage,
  delivered: bool,
}

impl ImageFileInput {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      delivered: false,
    }
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    expect_scheme(url, Self::SCHEME)?;

    let path = url_file_path(url);
    let unavailable = |e: &dyn std::fmt::Display| {
      InputError::SourceUnavailable(format!("{}: {}", path.display(), e))
    };
    let image = ImageReader::open(&path)
      .map_err(|e| unavailable(&e))?
      .decode()
      .map_err(|e| unavailable(&e))?;
    info!("读取图像: {} ({}x{})", path.display(), image.width(), image.height());

    Ok(Self::new(image.into_rgb8()))
  }
}

impl InputSource for ImageFileInput {
  fn next_frame(&mut self) -> Result<FramePull, InputError> {
    if self.delivered {
      return Ok(FramePull::End);
    }
    self.delivered = true;
    Ok(FramePull::Frame(Frame::new(self.image.clone(), 0, 0)))
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    self.delivered = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_one_frame_then_ends() {
    let mut input = ImageFileInput::new(RgbImage::new(8, 6));
    assert!(matches!(input.next_frame(), Ok(FramePull::Frame(f)) if f.index == 0));
    assert!(matches!(input.next_frame(), Ok(FramePull::End)));
    assert!(matches!(input.next_frame(), Ok(FramePull::End)));

    input.rewind().unwrap();
    assert!(matches!(input.next_frame(), Ok(FramePull::Frame(_))));
  }

  #[test]
  fn path_with_space_and_non_ascii_is_opened() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("bridge photos").join("长江大桥");
    std::fs::create_dir_all(&folder).unwrap();
    let path = folder.join("deck.png");
    RgbImage::from_pixel(5, 3, image::Rgb([7, 8, 9])).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    assert!(url.path().contains("bridge%20photos"));

    let mut input = ImageFileInput::from_url(&url).unwrap();
    match input.next_frame() {
      Ok(FramePull::Frame(frame)) => assert_eq!(frame.image.dimensions(), (5, 3)),
      other => panic!("期望一帧, 实际 {:?}", other),
    }
  }
}
