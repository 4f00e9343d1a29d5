// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/filter.rs - 类别过滤
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

use std::collections::BTreeSet;

use crate::model::Detection;

/// 保留类别在 `selected` 中的检测结果，顺序不变
///
/// `selected` 为空时结果总是为空。不在任何模型类别表中的标签只要被选中就会保留，
/// 类别表校验由调用方通过 [`unknown_classes`] 完成。
pub fn filter_detections(
  detections: Vec<Detection>,
  selected: &BTreeSet<String>,
) -> Vec<Detection> {
  if selected.is_empty() {
    return Vec::new();
  }
  detections
    .into_iter()
    .filter(|det| selected.contains(&det.label))
    .collect()
}

/// 返回 `selected` 中不属于 `vocabulary` 的类别
pub fn unknown_classes<'a>(
  selected: &'a BTreeSet<String>,
  vocabulary: &BTreeSet<String>,
) -> Vec<&'a str> {
  selected
    .iter()
    .filter(|class| !vocabulary.contains(*class))
    .map(String::as_str)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(label: &str, x: f32) -> Detection {
    Detection::new("m", label, 0.5, [x, 0.0, x + 1.0, 1.0])
  }

  fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn keeps_selected_labels_in_order() {
    let input = vec![
      det("crack", 0.0),
      det("pothole", 1.0),
      det("crack", 2.0),
      det("spalling", 3.0),
    ];
    let kept = filter_detections(input.clone(), &set(&["crack", "spalling"]));
    let expected: Vec<_> = input
      .into_iter()
      .filter(|d| d.label == "crack" || d.label == "spalling")
      .collect();
    assert_eq!(kept, expected);
  }

  #[test]
  fn empty_selection_is_inert() {
    let input = vec![det("crack", 0.0), det("pothole", 1.0)];
    assert!(filter_detections(input, &BTreeSet::new()).is_empty());
  }

  #[test]
  fn unknown_labels_pass_when_selected() {
    let input = vec![det("graffiti", 0.0), det("crack", 1.0)];
    let kept = filter_detections(input, &set(&["graffiti"]));
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].label, "graffiti");
  }

  #[test]
  fn reports_classes_outside_vocabulary() {
    let selected = set(&["crack", "graffiti", "rebar exposure"]);
    let vocabulary = set(&["crack", "pothole", "rebar exposure"]);
    assert_eq!(unknown_classes(&selected, &vocabulary), vec!["graffiti"]);
  }

  #[test]
  fn unknown_classes_borrow_only_the_selection() {
    let selected = set(&["crack", "graffiti"]);
    // 类别表是临时值，结果只借用 selected
    let unknown = unknown_classes(&selected, &set(&["crack"]));
    assert_eq!(unknown, vec!["graffiti"]);
  }
}
