// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 标注后的帧先以 PNG 缓存在 `<输出路径>.frames` 目录，`finish` 时调用 ffmpeg
//! 编码为 H.264 视频。视频尺寸由第一帧决定，之后尺寸不同的帧会被拒绝。
//!
//! # URL 格式
//!
//! - `video:///path/to/output.mp4` - 帧率取输入源帧率，未知时为 20 fps
//! - `video:///path/to/output.mp4?fps=30` - 指定帧率
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::path::{Path, PathBuf};
use std::process::Command;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::{OutputError, OutputWriter};
use crate::{FromUrl, FromUrlWithScheme, frame::Geometry, query_param, url_file_path};

#[derive(Error, Debug)]
pub enum SaveVideoFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
  #[error("帧尺寸 {actual} 与视频尺寸 {expected} 不一致")]
  GeometryMismatch { expected: Geometry, actual: Geometry },
}

const DEFAULT_FPS: u32 = 20;
const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 120;

/// 视频帧缓存
struct FrameBuffer {
  temp_dir: PathBuf,
  frames: usize,
  geometry: Option<Geometry>,
}

impl FrameBuffer {
  fn new(output_path: &Path) -> Result<Self, SaveVideoFileError> {
    // 在输出文件旁边创建临时目录
    let mut temp_dir = output_path.as_os_str().to_owned();
    temp_dir.push(".frames");
    let temp_dir = PathBuf::from(temp_dir);
    // 上次运行遗留的帧不能进入本次视频
    if temp_dir.exists() {
      warn!("清理遗留的帧缓存目录: {}", temp_dir.display());
      std::fs::remove_dir_all(&temp_dir)?;
    }
    std::fs::create_dir_all(&temp_dir)?;

    Ok(FrameBuffer {
      temp_dir,
      frames: 0,
      geometry: None,
    })
  }

  fn add_frame(&mut self, image: &RgbImage) -> Result<(), SaveVideoFileError> {
    let actual = Geometry {
      width: image.width(),
      height: image.height(),
    };
    match self.geometry {
      None => self.geometry = Some(actual),
      Some(expected) if expected != actual => {
        return Err(SaveVideoFileError::GeometryMismatch { expected, actual });
      }
      Some(_) => {}
    }

    let frame_path = self.temp_dir.join(format!("frame_{:06}.png", self.frames));
    image.save(&frame_path)?;
    self.frames += 1;

    Ok(())
  }

  fn encode_to_video(&self, output_path: &Path, fps: u32) -> Result<(), SaveVideoFileError> {
    info!(
      "开始编码视频: {} 帧 @ {} fps -> {}",
      self.frames,
      fps,
      output_path.display()
    );

    if let Some(parent) = output_path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    // 使用 ffmpeg 将帧序列编码为 MP4
    let ffmpeg_result = Command::new("ffmpeg")
      .arg("-y") // 覆盖已存在的文件
      .args(["-loglevel", "error"])
      .arg("-framerate")
      .arg(fps.to_string())
      .arg("-i")
      .arg(self.temp_dir.join("frame_%06d.png"))
      .args(["-c:v", "libx264"])
      .args(["-pix_fmt", "yuv420p"]) // 兼容性格式
      // libx264 要求宽高为偶数
      .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
      .args(["-preset", "fast"])
      .args(["-crf", "23"])
      .arg(output_path)
      .output();

    match ffmpeg_result {
      Ok(output) if output.status.success() => {
        info!("视频编码成功: {}", output_path.display());
        Ok(())
      }
      Ok(output) => {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("ffmpeg 错误: {}", stderr);
        Err(SaveVideoFileError::EncodingError(format!(
          "ffmpeg 失败: {}",
          stderr.trim()
        )))
      }
      Err(e) => {
        error!("无法执行 ffmpeg: {}", e);
        Err(SaveVideoFileError::EncodingError(format!(
          "无法执行 ffmpeg (请确保已安装): {}",
          e
        )))
      }
    }
  }

  fn cleanup(&self) {
    if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
      warn!("清理临时目录失败: {}", e);
    }
  }
}

/// RAII 守卫确保清理总是执行
struct CleanupGuard<'a>(&'a FrameBuffer);

impl<'a> Drop for CleanupGuard<'a> {
  fn drop(&mut self) {
    self.0.cleanup();
  }
}

pub struct SaveVideoFileOutput {
  path: PathBuf,
  fps: Option<u32>,
  source_fps: Option<f64>,
  buffer: Option<FrameBuffer>,
}

impl FromUrlWithScheme for SaveVideoFileOutput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for SaveVideoFileOutput {
  type Error = SaveVideoFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveVideoFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let fps = query_param(uri, "fps")
      .map(|v| {
        v.parse::<u32>()
          .map_err(|_| SaveVideoFileError::ValidationError(format!("FPS 无效: {}", v)))
      })
      .transpose()?;

    Self::new(url_file_path(uri), fps)
  }
}

impl SaveVideoFileOutput {
  pub fn new(path: impl Into<PathBuf>, fps: Option<u32>) -> Result<Self, SaveVideoFileError> {
    if let Some(fps) = fps
      && !(MIN_FPS..=MAX_FPS).contains(&fps)
    {
      return Err(SaveVideoFileError::ValidationError(format!(
        "FPS {} 超出有效范围 [{}, {}]",
        fps, MIN_FPS, MAX_FPS
      )));
    }

    Ok(Self {
      path: path.into(),
      fps,
      source_fps: None,
      buffer: None,
    })
  }

  /// 编码帧率：URL 参数优先，其次是输入源帧率，最后是默认值
  pub fn effective_fps(&self) -> u32 {
    self
      .fps
      .or_else(|| {
        self
          .source_fps
          .filter(|fps| fps.is_finite())
          .map(|fps| (fps.round() as u32).clamp(MIN_FPS, MAX_FPS))
      })
      .unwrap_or(DEFAULT_FPS)
  }

  fn add_frame(&mut self, image: &RgbImage) -> Result<(), SaveVideoFileError> {
    if self.buffer.is_none() {
      self.buffer = Some(FrameBuffer::new(&self.path)?);
      info!("初始化视频帧缓冲区: {}", self.path.display());
    }
    match self.buffer.as_mut() {
      Some(buffer) => buffer.add_frame(image),
      None => Ok(()),
    }
  }

  fn encode(&mut self) -> Result<Option<PathBuf>, SaveVideoFileError> {
    let Some(buffer) = self.buffer.take() else {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(None);
    };
    let _cleanup = CleanupGuard(&buffer);

    buffer.encode_to_video(&self.path, self.effective_fps())?;
    Ok(Some(self.path.clone()))
  }
}

impl OutputWriter for SaveVideoFileOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    Ok(self.add_frame(image)?)
  }

  fn finish(&mut self) -> Result<Option<PathBuf>, OutputError> {
    Ok(self.encode()?)
  }

  fn abort(&mut self) {
    if let Some(buffer) = self.buffer.take() {
      warn!("放弃视频输出: {}", self.path.display());
      buffer.cleanup();
    }
  }

  fn hint_fps(&mut self, fps: Option<f64>) {
    self.source_fps = fps;
  }
}

impl Drop for SaveVideoFileOutput {
  fn drop(&mut self) {
    // 未完成的输出不再编码，只清理临时帧
    if let Some(buffer) = self.buffer.take() {
      buffer.cleanup();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frames_dir(path: &Path) -> PathBuf {
    let mut dir = path.as_os_str().to_owned();
    dir.push(".frames");
    PathBuf::from(dir)
  }

  #[test]
  fn fps_prefers_query_then_source_then_default() {
    let mut output = SaveVideoFileOutput::new("/tmp/out.mp4", None).unwrap();
    assert_eq!(output.effective_fps(), DEFAULT_FPS);
    output.hint_fps(Some(29.97));
    assert_eq!(output.effective_fps(), 30);

    let mut output = SaveVideoFileOutput::new("/tmp/out.mp4", Some(12)).unwrap();
    output.hint_fps(Some(29.97));
    assert_eq!(output.effective_fps(), 12);

    assert!(matches!(
      SaveVideoFileOutput::new("/tmp/out.mp4", Some(0)),
      Err(SaveVideoFileError::ValidationError(_))
    ));
    let bad = Url::parse("video:///tmp/out.mp4?fps=fast").unwrap();
    assert!(matches!(
      SaveVideoFileOutput::from_url(&bad),
      Err(SaveVideoFileError::ValidationError(_))
    ));
  }

  #[test]
  fn geometry_is_fixed_by_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inspection.mp4");
    let mut output = SaveVideoFileOutput::new(&path, None).unwrap();

    output.write_frame(&RgbImage::new(8, 6)).unwrap();
    output.write_frame(&RgbImage::new(8, 6)).unwrap();
    let err = output.write_frame(&RgbImage::new(6, 8)).unwrap_err();
    assert!(matches!(
      err,
      OutputError::SaveVideoFileError(SaveVideoFileError::GeometryMismatch { .. })
    ));
    assert!(frames_dir(&path).join("frame_000001.png").exists());

    output.abort();
    assert!(!frames_dir(&path).exists());
    assert!(!path.exists());
  }

  #[test]
  fn finish_without_frames_produces_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mp4");
    let mut output = SaveVideoFileOutput::new(&path, None).unwrap();
    assert_eq!(output.finish().unwrap(), None);
    assert!(!frames_dir(&path).exists());
  }

  #[test]
  fn dropped_output_removes_temporary_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.mp4");
    {
      let mut output = SaveVideoFileOutput::new(&path, None).unwrap();
      output.write_frame(&RgbImage::new(4, 4)).unwrap();
      assert!(frames_dir(&path).exists());
    }
    assert!(!frames_dir(&path).exists());
  }

  #[test]
  fn stale_frames_from_earlier_run_are_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("interrupted.mp4");
    let stale = frames_dir(&path);
    std::fs::create_dir_all(&stale).unwrap();
    for i in 0..5 {
      RgbImage::new(4, 4).save(stale.join(format!("frame_{:06}.png", i))).unwrap();
    }

    let mut output = SaveVideoFileOutput::new(&path, None).unwrap();
    output.write_frame(&RgbImage::new(4, 4)).unwrap();

    let pngs = std::fs::read_dir(&stale)
      .unwrap()
      .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "png"))
      .count();
    assert_eq!(pngs, 1);
    output.abort();
  }
}
