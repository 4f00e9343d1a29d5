// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头输入源
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

//! URL 格式：`camera:///dev/video0?width=640&height=480&timeout_ms=1000`

use std::io::ErrorKind;
use std::pin::Pin;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{FramePull, InputError, InputSource, expect_scheme};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_param};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// V4L2 摄像头输入源
///
/// v4l 的 Stream 需要引用 Device，这里用 Pin<Box<Device>> 保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2CameraInput {
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  _device: Pin<Box<Device>>,
  frame_index: u64,
  width: u32,
  height: u32,
  fps: Option<f64>,
  start_time: Instant,
}

impl FromUrlWithScheme for V4l2CameraInput {
  const SCHEME: &'static str = "camera";
}

impl FromUrl for V4l2CameraInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    expect_scheme(url, Self::SCHEME)?;

    let number = |key: &str, default: u64| -> Result<u64, InputError> {
      match query_param(url, key) {
        Some(v) => v
          .parse::<u64>()
          .ok()
          .filter(|n| *n > 0)
          .ok_or_else(|| InputError::Config(format!("参数 {} 无效: {}", key, v))),
        None => Ok(default),
      }
    };

    Self::open(
      url.path(),
      number("width", DEFAULT_WIDTH as u64)? as u32,
      number("height", DEFAULT_HEIGHT as u64)? as u32,
      Duration::from_millis(number("timeout_ms", DEFAULT_TIMEOUT_MS)?),
    )
  }
}

impl V4l2CameraInput {
  pub fn open(
    device_path: &str,
    width: u32,
    height: u32,
    timeout: Duration,
  ) -> Result<Self, InputError> {
    let unavailable =
      |e: std::io::Error| InputError::SourceUnavailable(format!("{}: {}", device_path, e));

    let device = Box::pin(Device::with_path(device_path).map_err(unavailable)?);

    let mut format = device.format().map_err(unavailable)?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(unavailable)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(InputError::SourceUnavailable(format!(
        "{}: 设备不支持 YUYV 格式 (实际 {})",
        device_path, format.fourcc
      )));
    }

    let fps = device.params().ok().and_then(|params| {
      let interval = params.interval;
      (interval.numerator > 0).then(|| interval.denominator as f64 / interval.numerator as f64)
    });

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动；stream 字段声明在 device 之前，
    // 并且 Drop 中先释放 stream，所以引用在 stream 的整个生命周期内有效
    let device_ref: &Device = &device;
    let mut stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4).map_err(unavailable)?
    };
    stream.set_timeout(timeout);

    info!(
      "打开摄像头: {} ({}x{}, {:?} fps)",
      device_path, format.width, format.height, fps
    );

    Ok(Self {
      stream: Some(stream),
      _device: device,
      frame_index: 0,
      width: format.width,
      height: format.height,
      fps,
      start_time: Instant::now(),
    })
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Option<RgbImage> {
  let pixels = width as usize * height as usize;
  if yuyv.len() < pixels * 2 {
    return None;
  }

  let mut rgb = Vec::with_capacity(pixels * 3);
  for chunk in yuyv[..pixels * 2].chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  RgbImage::from_raw(width, height, rgb)
}

impl Drop for V4l2CameraInput {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl InputSource for V4l2CameraInput {
  fn next_frame(&mut self) -> Result<FramePull, InputError> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(FramePull::End);
    };

    match stream.next() {
      Ok((buffer, meta)) => {
        let used = (meta.bytesused as usize).min(buffer.len());
        let used = if used == 0 { buffer.len() } else { used };
        let Some(image) = yuyv_to_rgb(&buffer[..used], self.width, self.height) else {
          warn!("摄像头帧数据不完整: {} 字节", used);
          return Ok(FramePull::Skipped(InputError::Decode(format!(
            "帧数据不完整: {} 字节",
            used
          ))));
        };

        let frame = Frame::new(
          image,
          self.frame_index,
          self.start_time.elapsed().as_millis() as u64,
        );
        self.frame_index += 1;
        Ok(FramePull::Frame(frame))
      }
      Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
        debug!("摄像头暂时没有新帧: {}", e);
        Ok(FramePull::Pending)
      }
      Err(e) => Err(InputError::IoError(e)),
    }
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grey_yuyv_converts_to_grey_rgb() {
    let yuyv = [128u8, 128, 128, 128].repeat(4);
    let image = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
    assert!(image.pixels().all(|p| p.0 == [128, 128, 128]));
  }

  #[test]
  fn short_buffer_is_rejected() {
    assert!(yuyv_to_rgb(&[0u8; 10], 4, 2).is_none());
  }
}
