// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/frame.rs - 帧定义
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

//! 所有输入源与模型之间约定的帧格式：RGB 8 位、行优先（HWC）的 [`RgbImage`]。
//! 输入源负责在产出帧之前完成格式转换，调用方无需按模型分别转换。

use image::RgbImage;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引（从 0 开始，按输入顺序递增）
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn geometry(&self) -> Geometry {
    Geometry {
      width: self.image.width(),
      height: self.image.height(),
    }
  }
}

/// 帧尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
  pub width: u32,
  pub height: u32,
}

impl std::fmt::Display for Geometry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}
