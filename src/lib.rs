// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod engine;
pub mod filter;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod record;
pub mod report;
pub mod session;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 读取 URL 查询参数
pub(crate) fn query_param(url: &url::Url, key: &str) -> Option<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| v.into_owned())
}

/// URL 路径对应的本地文件路径（已做百分号解码）
pub(crate) fn url_file_path(url: &url::Url) -> std::path::PathBuf {
  match urlencoding::decode(url.path()) {
    Ok(path) => std::path::PathBuf::from(path.into_owned()),
    Err(_) => std::path::PathBuf::from(url.path()),
  }
}
