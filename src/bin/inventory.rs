// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/bin/inventory.rs - 资产台账管理
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

use anyhow::Result;
use clap::{Parser, Subcommand};

use terminus::record::{AssetType, InspectionStore, Inventory, NewAsset, SqliteStore};

/// Terminus 资产台账
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 巡检数据库
  #[arg(long, value_name = "DATABASE")]
  pub database: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 新增桥梁或道路
  Add {
    #[arg(long)]
    name: String,
    #[arg(long)]
    location: String,
    /// bridge 或 road
    #[arg(long = "type", value_name = "TYPE")]
    asset_type: AssetType,
    #[arg(long)]
    built_year: i32,
  },
  /// 列出全部资产
  List,
  /// 某资产的巡检历史
  History {
    #[arg(long, value_name = "ASSET_ID")]
    asset: i64,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut store = SqliteStore::open(&args.database)?;

  match args.command {
    Command::Add {
      name,
      location,
      asset_type,
      built_year,
    } => {
      let asset = store.add_asset(NewAsset {
        name,
        location,
        asset_type,
        built_year,
      })?;
      println!("{}", serde_json::to_string(&asset)?);
    }
    Command::List => {
      for asset in store.list()? {
        println!("{}", serde_json::to_string(&asset)?);
      }
    }
    Command::History { asset } => {
      for record in store.inspections_for(asset)? {
        println!("{}", serde_json::to_string(&record)?);
      }
    }
  }

  Ok(())
}
