// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::model::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const PALETTE_SIZE: u32 = 24;

pub struct Draw<'a> {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: FontRef<'a>,
}

impl Default for Draw<'static> {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font,
    }
  }
}

/// 标签文本，例如 `crack (0.87)`
pub fn label_text(detection: &Detection) -> String {
  format!("{} ({:.2})", detection.label, detection.confidence)
}

/// 按类别名生成固定颜色，同一类别在所有帧中颜色一致
pub fn label_color(label: &str) -> Rgb<u8> {
  let hash = label
    .bytes()
    .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
  let hue = (hash % PALETTE_SIZE) as f32 / PALETTE_SIZE as f32 * 360.0;
  hsv_to_rgb(hue, 0.85, 0.95)
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl<'a> Draw<'a> {
  /// 在图像副本上绘制检测结果，原图保持不变
  ///
  /// 返回绘制后的图像以及各检测结果的类别名（与输入顺序一致）。
  pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> (RgbImage, Vec<String>) {
    let mut annotated = image.clone();
    let labels = self.annotate_in_place(&mut annotated, detections);
    (annotated, labels)
  }

  /// 直接在 `image` 上绘制，多个模型的结果可以依次叠加在同一张图上
  pub fn annotate_in_place(&self, image: &mut RgbImage, detections: &[Detection]) -> Vec<String> {
    detections
      .iter()
      .map(|det| {
        self.draw_bbox_with_label(image, det);
        det.label.clone()
      })
      .collect()
  }

  // 边框坐标取整后裁剪到图像范围内，完全在图像外的框不绘制
  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [bx1, by1, bx2, by2] = detection.bbox;
    if !(bx1.is_finite() && by1.is_finite() && bx2.is_finite() && by2.is_finite()) {
      return;
    }
    let x_min = bx1.floor() as i32;
    let y_min = by1.floor() as i32;
    let x_max = bx2.ceil() as i32;
    let y_max = by2.ceil() as i32;

    if x_max < 0 || y_max < 0 || x_min >= w || y_min >= h {
      return;
    }

    let x_min = x_min.clamp(0, w - 1);
    let y_min = y_min.clamp(0, h - 1);
    let x_max = x_max.clamp(0, w - 1);
    let y_max = y_max.clamp(0, h - 1);

    let color = label_color(&detection.label);
    let box_width = (x_max - x_min + 1) as u32;
    let box_height = (y_max - y_min + 1) as u32;

    // 绘制边框（加粗为2像素）
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(box_width, box_height), color);
    if box_width > 2 && box_height > 2 {
      let inner = Rect::at(x_min + 1, y_min + 1).of_size(box_width - 2, box_height - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let label = label_text(detection);
    let scale = PxScale::from(self.font_size);

    // 估算文本大小（粗略估计）
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景位于边框上方，空间不足时放进边框内
    let label_x = x_min;
    let label_y = if y_min >= text_height {
      y_min - text_height
    } else {
      y_min
    };

    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);

      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        &self.font,
        &label,
      );
    }
  }
}
