// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 缺陷检测模型
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

//! YOLOv8 导出格式的 ONNX 模型，使用 tract 在 CPU 上推理。
//!
//! URL 格式：
//!
//! `yolo:///models/road.onnx?labels=/models/road.txt&size=640&confidence=0.25&nms=0.45&id=road`
//!
//! - `labels`: 类别文件，每行一个类别名（或使用 `classes=crack,pothole`）
//! - `size`: 模型输入边长，默认 640
//! - `confidence`: 置信度阈值，默认 0.25
//! - `nms`: NMS IoU 阈值，默认 0.45

use std::collections::BTreeSet;
use std::path::PathBuf;

use image::imageops::{FilterType, resize};
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use super::{Detection, DetectionModel, ModelError, class_names_from_url, model_id_from_url};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_param, url_file_path};

const YOLO_DEFAULT_INPUT_SIZE: usize = 640;
const YOLO_DEFAULT_CONFIDENCE: f32 = 0.25;
const YOLO_DEFAULT_NMS: f32 = 0.45;
const YOLO_BOX_CHANNELS: usize = 4;

#[derive(Debug)]
pub struct YoloModelBuilder {
  model_path: PathBuf,
  id: String,
  classes: Vec<String>,
  input_size: usize,
  confidence: f32,
  nms_threshold: f32,
}

impl FromUrlWithScheme for YoloModelBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let parse = |key: &str| -> Result<Option<f32>, ModelError> {
      query_param(url, key)
        .map(|v| {
          v.parse::<f32>()
            .map_err(|_| ModelError::Config(format!("参数 {} 无效: {}", key, v)))
        })
        .transpose()
    };

    let input_size = match query_param(url, "size") {
      Some(v) => v
        .parse::<usize>()
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| ModelError::Config(format!("参数 size 无效: {}", v)))?,
      None => YOLO_DEFAULT_INPUT_SIZE,
    };

    Ok(YoloModelBuilder {
      model_path: url_file_path(url),
      id: model_id_from_url(url),
      classes: class_names_from_url(url)?,
      input_size,
      confidence: parse("confidence")?.unwrap_or(YOLO_DEFAULT_CONFIDENCE),
      nms_threshold: parse("nms")?.unwrap_or(YOLO_DEFAULT_NMS),
    })
  }
}

impl YoloModelBuilder {
  pub fn build(self) -> Result<YoloModel, ModelError> {
    info!("加载模型文件: {} ({})", self.model_path.display(), self.id);
    let size = self.input_size;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::Unavailable(format!("{}: {:#}", self.model_path.display(), e)))?;
    info!("模型加载完成: {} 个类别", self.classes.len());

    Ok(YoloModel {
      plan,
      decoder: OutputDecoder {
        id: self.id,
        classes: self.classes,
        input_size: size,
        confidence: self.confidence,
        nms_threshold: self.nms_threshold,
      },
    })
  }
}

pub struct YoloModel {
  plan: TypedRunnableModel<TypedModel>,
  decoder: OutputDecoder,
}

/// YOLOv8 输出解码参数
struct OutputDecoder {
  id: String,
  classes: Vec<String>,
  input_size: usize,
  confidence: f32,
  nms_threshold: f32,
}

impl OutputDecoder {
  fn label_of(&self, class_id: usize) -> String {
    self
      .classes
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }

  /// 解析 `[1, 4 + nc, N]`（或转置的 `[1, N, 4 + nc]`）输出，框坐标换算回帧像素
  fn decode(&self, output: &Tensor, width: u32, height: u32) -> Result<Vec<Detection>, ModelError> {
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::Inference(format!("输出张量类型错误: {:#}", e)))?
      .into_dimensionality::<tract_ndarray::Ix3>()
      .map_err(|e| ModelError::Inference(format!("输出张量维度错误: {}", e)))?;

    let (_, a, b) = view.dim();
    // 通道数总是远小于候选框数量
    let channels_first = a <= b;
    let (channels, candidates) = if channels_first { (a, b) } else { (b, a) };
    if channels <= YOLO_BOX_CHANNELS {
      return Err(ModelError::Inference(format!(
        "输出通道数 {} 不足以包含类别分数",
        channels
      )));
    }
    let at = |c: usize, i: usize| {
      if channels_first {
        view[[0, c, i]]
      } else {
        view[[0, i, c]]
      }
    };

    let scale_x = width as f32 / self.input_size as f32;
    let scale_y = height as f32 / self.input_size as f32;

    let mut kept = Vec::new();
    for i in 0..candidates {
      let (class_id, score) = (YOLO_BOX_CHANNELS..channels)
        .map(|c| (c - YOLO_BOX_CHANNELS, at(c, i)))
        .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
      if score < self.confidence {
        continue;
      }

      let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
      let bbox = [
        (cx - w / 2.0) * scale_x,
        (cy - h / 2.0) * scale_y,
        (cx + w / 2.0) * scale_x,
        (cy + h / 2.0) * scale_y,
      ];
      let detection = Detection::new(self.id.as_str(), self.label_of(class_id), score, bbox);
      kept.push((class_id, detection));
    }

    Ok(nms(kept, self.nms_threshold))
  }
}

impl YoloModel {
  /// 缩放到模型输入尺寸并转为 NCHW、归一化到 [0, 1]
  fn preprocess(&self, frame: &Frame) -> Tensor {
    let size = self.decoder.input_size;
    let resized = resize(&frame.image, size as u32, size as u32, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .into_tensor()
  }
}

impl DetectionModel for YoloModel {
  fn id(&self) -> &str {
    &self.decoder.id
  }

  fn known_classes(&self) -> BTreeSet<String> {
    self.decoder.classes.iter().cloned().collect()
  }

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    if frame.image.width() == 0 || frame.image.height() == 0 {
      return Err(ModelError::Inference("空帧无法推理".to_string()));
    }

    let input = self.preprocess(frame);
    let now = std::time::Instant::now();
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;
    debug!("模型 {} 推理耗时: {:.2?}", self.decoder.id, now.elapsed());

    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Inference("模型没有输出".to_string()))?;
    self.decoder.decode(output, frame.image.width(), frame.image.height())
  }
}

/// 按类别的非极大值抑制，结果按置信度降序
fn nms(mut detections: Vec<(usize, Detection)>, threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));

  let mut result: Vec<(usize, Detection)> = Vec::new();
  for (class_id, det) in detections {
    let suppressed = result
      .iter()
      .any(|(kept_class, kept)| *kept_class == class_id && iou(kept, &det) >= threshold);
    if !suppressed {
      result.push((class_id, det));
    }
  }
  result.into_iter().map(|(_, det)| det).collect()
}

/// 计算两个边界框的 IoU
fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.bbox[0].max(b.bbox[0]);
  let y1 = a.bbox[1].max(b.bbox[1]);
  let x2 = a.bbox[2].min(b.bbox[2]);
  let y2 = a.bbox[3].min(b.bbox[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.width() * a.height() + b.width() * b.height() - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(label: &str, score: f32, bbox: [f32; 4]) -> Detection {
    Detection::new("yolo", label, score, bbox)
  }

  fn decoder() -> OutputDecoder {
    OutputDecoder {
      id: "road".to_string(),
      classes: vec!["crack".to_string(), "pothole".to_string()],
      input_size: 100,
      confidence: 0.5,
      nms_threshold: YOLO_DEFAULT_NMS,
    }
  }

  /// 每行 `[cx, cy, w, h, crack, pothole, spalling]`，其余候选框全为 0
  const CANDIDATES: [[f32; 7]; 3] = [
    [50.0, 50.0, 20.0, 10.0, 0.1, 0.8, 0.0],
    [10.0, 20.0, 4.0, 4.0, 0.3, 0.2, 0.1],
    [80.0, 30.0, 10.0, 20.0, 0.2, 0.1, 0.9],
  ];
  const ANCHORS: usize = 8;

  fn candidate(i: usize, c: usize) -> f32 {
    CANDIDATES.get(i).map_or(0.0, |row| row[c])
  }

  fn channels_first() -> Tensor {
    tract_ndarray::Array3::from_shape_fn((1, 7, ANCHORS), |(_, c, i)| candidate(i, c)).into_tensor()
  }

  #[test]
  fn channels_first_output_is_decoded_to_frame_pixels() {
    let detections = decoder().decode(&channels_first(), 200, 50).unwrap();
    assert_eq!(detections.len(), 2);

    // 分数最高的在前；超出类别表的类别使用 class_<id>
    assert_eq!(detections[0].label, "class_2");
    assert_eq!(detections[0].model_id, "road");
    assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    assert_eq!(detections[0].bbox, [150.0, 10.0, 170.0, 20.0]);

    assert_eq!(detections[1].label, "pothole");
    assert_eq!(detections[1].bbox, [80.0, 22.5, 120.0, 27.5]);
  }

  #[test]
  fn transposed_output_gives_the_same_detections() {
    let transposed =
      tract_ndarray::Array3::from_shape_fn((1, ANCHORS, 7), |(_, i, c)| candidate(i, c));

    assert_eq!(
      decoder().decode(&transposed.into_tensor(), 200, 50).unwrap(),
      decoder().decode(&channels_first(), 200, 50).unwrap()
    );
  }

  #[test]
  fn output_without_class_scores_is_rejected() {
    let output = tract_ndarray::Array3::<f32>::zeros((1, 4, 10)).into_tensor();
    assert!(matches!(
      decoder().decode(&output, 10, 10),
      Err(ModelError::Inference(_))
    ));
  }

  #[test]
  fn nms_suppresses_overlaps_within_a_class_only() {
    let kept = nms(
      vec![
        (0, det("crack", 0.6, [0.0, 0.0, 10.0, 10.0])),
        (0, det("crack", 0.9, [1.0, 1.0, 11.0, 11.0])),
        (1, det("pothole", 0.5, [0.0, 0.0, 10.0, 10.0])),
        (0, det("crack", 0.7, [50.0, 50.0, 60.0, 60.0])),
      ],
      0.45,
    );
    let summary: Vec<_> = kept.iter().map(|d| (d.label.as_str(), d.confidence)).collect();
    assert_eq!(summary, vec![("crack", 0.9), ("crack", 0.7), ("pothole", 0.5)]);
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = det("crack", 0.5, [0.0, 0.0, 4.0, 4.0]);
    let b = det("crack", 0.5, [10.0, 10.0, 14.0, 14.0]);
    assert_eq!(iou(&a, &b), 0.0);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn builder_reads_query_parameters() {
    let url =
      Url::parse("yolo:///models/road.onnx?classes=crack,pothole&size=320&confidence=0.4").unwrap();
    let builder = YoloModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.id, "road");
    assert_eq!(builder.classes, vec!["crack", "pothole"]);
    assert_eq!(builder.input_size, 320);
    assert_eq!(builder.confidence, 0.4);
    assert_eq!(builder.nms_threshold, YOLO_DEFAULT_NMS);

    let bad = Url::parse("yolo:///models/road.onnx?size=zero").unwrap();
    assert!(matches!(YoloModelBuilder::from_url(&bad), Err(ModelError::Config(_))));
  }

  #[test]
  fn missing_model_file_is_unavailable() {
    let url = Url::parse("yolo:///nonexistent/terminus/model.onnx").unwrap();
    let result = YoloModelBuilder::from_url(&url).unwrap().build();
    assert!(matches!(result, Err(ModelError::Unavailable(_))));
  }
}
