// 该文件是 Terminus （桥路巡检） 项目的一部分。
// tests/inspection_flow.rs - 从图像序列到巡检报告的完整流程
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

use std::path::Path;

use image::{Rgb, RgbImage};
use url::Url;

use terminus::{
  FromUrl,
  engine::{DetectionEngine, Selection},
  input::InputWrapper,
  model::{DetectionModel, ModelWrapper},
  output::OutputWrapper,
  record::{AssetType, InspectionStore, Inventory, Measurements, NewAsset, SqliteStore, finalize},
  report::generate_report,
  session::PipelineSession,
  task::{PipelineState, StreamPipeline},
};

const DETECTIONS: &str = r#"
{"frame": 0, "label": "crack", "confidence": 0.91, "bbox": [4.0, 4.0, 30.0, 20.0]}
{"frame": 2, "label": "pothole", "confidence": 0.72, "bbox": [10.0, 10.0, 40.0, 30.0]}
{"frame": 2, "label": "spalling", "confidence": 0.65, "bbox": [2.0, 2.0, 12.0, 12.0]}
{"frame": 2, "label": "crack", "confidence": 0.58, "bbox": [20.0, 5.0, 60.0, 40.0]}
"#;

fn write_frames(dir: &Path, count: u32) {
  std::fs::create_dir_all(dir).unwrap();
  for i in 0..count {
    let image = RgbImage::from_pixel(64, 48, Rgb([90, 90, 90 + i as u8 * 10]));
    image.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
  }
}

fn url(scheme: &str, path: &Path, query: &str) -> Url {
  Url::parse(&format!("{}://{}{}", scheme, path.display(), query)).unwrap()
}

#[test]
fn folder_inspection_is_recorded_and_reported() {
  let dir = tempfile::tempdir().unwrap();
  let frames = dir.path().join("frames");
  write_frames(&frames, 3);
  let detections = dir.path().join("detections.jsonl");
  std::fs::write(&detections, DETECTIONS).unwrap();
  let annotated = dir.path().join("annotated.png");

  let model = ModelWrapper::from_url(&url("recorded", &detections, "?id=replay")).unwrap();
  let engine = DetectionEngine::new(vec![Box::new(model) as Box<dyn DetectionModel>]);
  assert_eq!(engine.model_ids(), vec!["replay"]);

  let session =
    PipelineSession::new(&engine, Selection::new(["replay"], ["crack", "pothole"])).unwrap();
  let mut source = InputWrapper::from_url(&url("folder", &frames, "")).unwrap();
  let mut sink = OutputWrapper::from_url(&url("image", &annotated, "")).unwrap();

  let run = StreamPipeline::new(&engine).run(session, &mut source, &mut sink);
  assert_eq!(run.state, PipelineState::Completed);
  assert!(run.error.is_none());
  assert_eq!(run.session.frames_processed(), 3);
  assert_eq!(run.session.labels(), ["crack", "pothole", "crack"]);
  assert_eq!(run.artifact.as_deref(), Some(annotated.as_path()));

  // 最后一帧带有 pothole 的标注框
  let saved = image::open(&annotated).unwrap().to_rgb8();
  assert_ne!(*saved.get_pixel(10, 20), Rgb([90, 90, 110]));

  let mut store = SqliteStore::open(dir.path().join("inspections.db")).unwrap();
  let asset = store
    .add_asset(NewAsset {
      name: "Riverside Road".to_string(),
      location: "KM 12+400".to_string(),
      asset_type: AssetType::Road,
      built_year: 1998,
    })
    .unwrap();

  let record = finalize(
    &mut store,
    run.session,
    asset.id,
    Measurements::new(40.0, 7.5),
    Some("minor".to_string()),
    annotated.clone(),
  )
  .unwrap();
  assert_eq!(record.defects, vec!["crack", "pothole", "crack"]);
  assert_eq!(store.inspections_for(asset.id).unwrap(), vec![record.clone()]);

  let asset = store.get(asset.id).unwrap().unwrap();
  assert_eq!(asset.last_inspection, Some(record.date));

  let mut report = generate_report(&record, &asset).unwrap();
  let lines = report.text_lines().unwrap();
  for expected in ["1. crack", "2. pothole", "3. crack", "crack: 2", "pothole: 1", "Type: road"] {
    assert!(lines.contains(&expected.to_string()), "缺少 {:?}", expected);
  }
  assert!(!lines.iter().any(|l| l.contains("spalling")));

  let pdf = dir.path().join("report.pdf");
  report.save(&pdf).unwrap();
  assert!(std::fs::read(&pdf).unwrap().starts_with(b"%PDF-"));
}

#[test]
fn unknown_model_selection_is_rejected_before_running() {
  let dir = tempfile::tempdir().unwrap();
  let detections = dir.path().join("detections.jsonl");
  std::fs::write(&detections, DETECTIONS).unwrap();

  let model = ModelWrapper::from_url(&url("recorded", &detections, "?id=replay")).unwrap();
  let engine = DetectionEngine::new(vec![Box::new(model) as Box<dyn DetectionModel>]);

  assert!(PipelineSession::new(&engine, Selection::new(["potholes"], ["crack"])).is_err());
  assert!(PipelineSession::new(&engine, Selection::new(Vec::<String>::new(), ["crack"])).is_err());
}
