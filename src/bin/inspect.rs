// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/bin/inspect.rs - 缺陷检测任务
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

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use terminus::{
  FromUrl,
  engine::{DetectionEngine, Selection},
  input::InputWrapper,
  model::{DetectionModel, ModelWrapper},
  output::OutputWrapper,
  record::{Inventory, Measurements, SqliteStore, finalize},
  report::generate_report,
  session::PipelineSession,
  task::{PipelineState, StreamPipeline},
};

/// Terminus 缺陷检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，可重复，例如 yolo:///models/road.onnx?labels=/models/road.txt
  #[arg(long, value_name = "MODEL", required = true)]
  pub model: Vec<Url>,
  /// 输入来源：image:// folder:// video:// camera://
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出：preview:// image:// video://
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 参与检测的模型标识，默认使用全部模型
  #[arg(long = "use-model", value_name = "ID")]
  pub use_model: Vec<String>,
  /// 保留的缺陷类别，默认保留所选模型的全部类别
  #[arg(long = "class", value_name = "CLASS")]
  pub classes: Vec<String>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 摄像头连续多少次没有新帧后结束
  #[arg(long, value_name = "TIMES")]
  pub max_idle: Option<u32>,
  #[arg(long, value_name = "MILLIS", default_value_t = 50)]
  pub idle_backoff_ms: u64,

  /// 巡检数据库，与 --asset 一起使用时保存巡检记录
  #[arg(long, value_name = "DATABASE")]
  pub database: Option<PathBuf>,
  #[arg(long, value_name = "ASSET_ID", requires = "database")]
  pub asset: Option<i64>,
  /// 长度（米）
  #[arg(long, default_value_t = 0.0)]
  pub length: f64,
  /// 宽度（米）
  #[arg(long, default_value_t = 0.0)]
  pub width: f64,
  #[arg(long)]
  pub severity: Option<String>,
  /// 保存巡检记录后生成 PDF 报告
  #[arg(long, value_name = "REPORT", requires = "asset")]
  pub report: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut models: Vec<Box<dyn DetectionModel>> = Vec::with_capacity(args.model.len());
  for url in &args.model {
    info!("加载模型: {}", url);
    let model = ModelWrapper::from_url(url).with_context(|| format!("无法加载模型 {}", url))?;
    models.push(Box::new(model));
  }
  let engine = DetectionEngine::new(models);

  let selected_models = if args.use_model.is_empty() {
    engine.model_ids().into_iter().map(String::from).collect()
  } else {
    args.use_model.clone()
  };
  let selected_classes = if args.classes.is_empty() {
    let models = engine.select(&selected_models)?;
    let classes: Vec<String> = models.iter().flat_map(|m| m.known_classes()).collect();
    info!("未指定类别，使用全部 {} 个类别", classes.len());
    classes
  } else {
    args.classes.clone()
  };

  let session = PipelineSession::new(&engine, Selection::new(selected_models, selected_classes))?;
  session.cancel_token().cancel_on_ctrlc()?;

  let mut source = InputWrapper::from_url(&args.input)?;
  let mut sink = OutputWrapper::from_url(&args.output)?;

  let run = StreamPipeline::new(&engine)
    .with_idle_backoff(Duration::from_millis(args.idle_backoff_ms))
    .with_max_frames(args.frame_number)
    .with_max_idle(args.max_idle)
    .run(session, &mut source, &mut sink);

  println!(
    "{}",
    json!({
      "state": format!("{:?}", run.state),
      "frames": run.session.frames_processed(),
      "issues": run.session.issues().len(),
      "defects": run.session.labels(),
      "artifact": run.artifact,
    })
  );

  if let Some(error) = run.error {
    bail!("任务失败: {}", error);
  }

  let (Some(db_path), Some(asset_id)) = (&args.database, args.asset) else {
    return Ok(());
  };
  let Some(artifact) = run.artifact.clone() else {
    warn!("输出没有生成文件，不保存巡检记录");
    return Ok(());
  };
  if run.state == PipelineState::Cancelled {
    warn!("任务被中断，巡检记录只包含已处理的帧");
  }

  let mut store = SqliteStore::open(db_path)?;
  let record = finalize(
    &mut store,
    run.session,
    asset_id,
    Measurements::new(args.length, args.width),
    args.severity.clone(),
    artifact,
  )?;
  println!("{}", serde_json::to_string(&record)?);

  if let Some(report_path) = &args.report {
    let asset = store
      .get(asset_id)?
      .with_context(|| format!("资产 {} 不存在", asset_id))?;
    generate_report(&record, &asset)?.save(report_path)?;
  }

  Ok(())
}
