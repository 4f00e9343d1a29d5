// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/input/ffmpeg_video.rs - 视频文件输入
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

//! 视频文件输入模块
//!
//! 通过 FFmpeg 解码视频流，并缩放为 RGB24 帧。
//!
//! URL 格式：`video:///path/to/inspection.mp4`

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use tracing::{debug, info, warn};
use url::Url;

use super::{FramePull, InputError, InputSource, expect_scheme};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

/// 视频输入源
pub struct VideoFileInput {
  path: PathBuf,
  /// FFmpeg 输入上下文
  input: ffmpeg::format::context::Input,
  /// 视频流索引
  stream_index: usize,
  decoder: ffmpeg::decoder::Video,
  /// 转换为 RGB24 的缩放上下文
  scaler: ScalingContext,
  width: u32,
  height: u32,
  fps: Option<f64>,
  /// 时间基准（秒）
  time_base: f64,
  frame_index: u64,
  /// 已向解码器发送 EOF
  drained: bool,
  finished: bool,
}

impl FromUrlWithScheme for VideoFileInput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for VideoFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    expect_scheme(url, Self::SCHEME)?;
    Self::open(url_file_path(url))
  }
}

fn unavailable(path: &Path, what: &str, e: impl std::fmt::Display) -> InputError {
  InputError::SourceUnavailable(format!("{}: {}: {}", path.display(), what, e))
}

impl VideoFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(InputError::SourceUnavailable(format!(
        "视频文件不存在: {}",
        path.display()
      )));
    }

    ffmpeg::init().map_err(|e| unavailable(path, "无法初始化 FFmpeg", e))?;
    let input = ffmpeg::format::input(&path).map_err(|e| unavailable(path, "无法打开视频文件", e))?;

    let stream = input
      .streams()
      .best(Type::Video)
      .ok_or_else(|| unavailable(path, "找不到视频流", "no video stream"))?;
    let stream_index = stream.index();

    let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
      .map_err(|e| unavailable(path, "无法读取解码参数", e))?;
    let decoder = context
      .decoder()
      .video()
      .map_err(|e| unavailable(path, "无法打开视频解码器", e))?;

    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
      return Err(unavailable(path, "视频尺寸无效", format!("{}x{}", width, height)));
    }

    let rate = stream.avg_frame_rate();
    let fps = (rate.numerator() > 0 && rate.denominator() > 0)
      .then(|| rate.numerator() as f64 / rate.denominator() as f64);
    let time_base = stream.time_base();
    let time_base = if time_base.denominator() > 0 {
      time_base.numerator() as f64 / time_base.denominator() as f64
    } else {
      0.0
    };

    let scaler = ScalingContext::get(
      decoder.format(),
      width,
      height,
      Pixel::RGB24,
      width,
      height,
      Flags::BILINEAR,
    )
    .map_err(|e| unavailable(path, "无法创建缩放上下文", e))?;

    info!(
      "打开视频文件: {} ({}x{}, {:?} fps)",
      path.display(),
      width,
      height,
      fps
    );

    Ok(Self {
      path: path.to_path_buf(),
      input,
      stream_index,
      decoder,
      scaler,
      width,
      height,
      fps,
      time_base,
      frame_index: 0,
      drained: false,
      finished: false,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// 读取下一个属于视频流的数据包
  fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
    let index = self.stream_index;
    self
      .input
      .packets()
      .find(|(stream, _)| stream.index() == index)
      .map(|(_, packet)| packet)
  }

  fn timestamp_ms(&self, decoded: &Video) -> u64 {
    match decoded.timestamp() {
      Some(ts) if ts >= 0 && self.time_base > 0.0 => (ts as f64 * self.time_base * 1000.0) as u64,
      _ => self
        .fps
        .map(|fps| (self.frame_index as f64 * 1000.0 / fps) as u64)
        .unwrap_or(0),
    }
  }

  /// 缩放为 RGB24 并按行拷贝（跳过对齐填充）
  fn to_frame(&mut self, decoded: &Video) -> Result<Frame, InputError> {
    let mut rgb = Video::empty();
    self
      .scaler
      .run(decoded, &mut rgb)
      .map_err(|e| InputError::Decode(format!("无法转换为 RGB: {}", e)))?;

    let row_bytes = self.width as usize * 3;
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
    for row in 0..self.height as usize {
      let start = row * stride;
      let line = data
        .get(start..start + row_bytes)
        .ok_or_else(|| InputError::Decode("解码帧的行越界".to_string()))?;
      pixels.extend_from_slice(line);
    }

    let image = RgbImage::from_raw(self.width, self.height, pixels)
      .ok_or_else(|| InputError::Decode("无法创建 RGB 图像".to_string()))?;
    Ok(Frame::new(image, self.frame_index, self.timestamp_ms(decoded)))
  }
}

impl InputSource for VideoFileInput {
  fn next_frame(&mut self) -> Result<FramePull, InputError> {
    if self.finished {
      return Ok(FramePull::End);
    }

    loop {
      // 先取出解码器中已有的帧
      let mut decoded = Video::empty();
      if self.decoder.receive_frame(&mut decoded).is_ok() {
        let pull = match self.to_frame(&decoded) {
          Ok(frame) => FramePull::Frame(frame),
          Err(e) => {
            warn!("第 {} 帧转换失败: {}", self.frame_index, e);
            FramePull::Skipped(e)
          }
        };
        self.frame_index += 1;
        return Ok(pull);
      }

      if self.drained {
        debug!("视频解码结束: {} 帧", self.frame_index);
        self.finished = true;
        return Ok(FramePull::End);
      }

      match self.next_packet() {
        Some(packet) => {
          if let Err(e) = self.decoder.send_packet(&packet) {
            warn!("数据包解码失败: {}", e);
            return Ok(FramePull::Skipped(InputError::Decode(format!(
              "第 {} 帧附近的数据包无法解码: {}",
              self.frame_index, e
            ))));
          }
        }
        None => {
          self.drained = true;
          if let Err(e) = self.decoder.send_eof() {
            warn!("无法结束解码器: {}", e);
          }
        }
      }
    }
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    *self = Self::open(&self.path)?;
    Ok(())
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_video_is_unavailable() {
    let url = Url::parse("video:///nonexistent/terminus/survey.mp4").unwrap();
    assert!(matches!(
      VideoFileInput::from_url(&url),
      Err(InputError::SourceUnavailable(_))
    ));
  }

  #[test]
  fn unreadable_container_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("survey.mp4");
    std::fs::write(&path, b"this is not an mp4 container").unwrap();

    assert!(matches!(
      VideoFileInput::open(&path),
      Err(InputError::SourceUnavailable(_))
    ));
  }
}
