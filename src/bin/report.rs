// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/bin/report.rs - 重新生成巡检报告
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use terminus::{
  record::{InspectionStore, Inventory, SqliteStore},
  report::generate_report,
};

/// 根据已保存的巡检记录生成 PDF 报告
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 巡检数据库
  #[arg(long, value_name = "DATABASE")]
  pub database: PathBuf,
  /// 巡检记录编号
  #[arg(long, value_name = "INSPECTION_ID")]
  pub inspection: i64,
  /// 报告输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let store = SqliteStore::open(&args.database)?;

  let record = store
    .inspection(args.inspection)?
    .with_context(|| format!("巡检记录 {} 不存在", args.inspection))?;
  let asset = store
    .get(record.asset_id)?
    .with_context(|| format!("资产 {} 不存在", record.asset_id))?;
  info!("生成报告: 巡检 {}, 资产 {} ({})", record.id, asset.id, asset.name);

  let mut report = generate_report(&record, &asset)?;
  report.save(&args.output)?;
  info!("报告共 {} 页", report.page_count());

  Ok(())
}
