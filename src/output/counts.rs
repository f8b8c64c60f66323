// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/counts.rs - 检测数量统计表
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

use std::fmt;

use crate::pipeline::Detection;

/// 统计表固定显示的行数
pub const TABLE_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountRow {
  Filled { label: String, count: usize },
  Empty,
}

/// 每帧重建的 标签 → 数量 映射，保留首次出现的顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionCounts {
  entries: Vec<(String, usize)>,
}

impl DetectionCounts {
  pub fn from_detections(detections: &[Detection]) -> Self {
    Self::from_labels(detections.iter().map(|d| d.label.as_str()))
  }

  pub fn from_labels<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut entries: Vec<(String, usize)> = Vec::new();
    for label in labels {
      let label = label.as_ref();
      match entries.iter_mut().find(|(l, _)| l == label) {
        Some((_, count)) => *count += 1,
        None => entries.push((label.to_string(), 1)),
      }
    }
    Self { entries }
  }

  pub fn get(&self, label: &str) -> usize {
    self
      .entries
      .iter()
      .find(|(l, _)| l == label)
      .map(|(_, c)| *c)
      .unwrap_or(0)
  }

  /// 按数量降序，数量相同保持首次出现顺序
  pub fn sorted(&self) -> Vec<(&str, usize)> {
    let mut sorted: Vec<(&str, usize)> = self
      .entries
      .iter()
      .map(|(l, c)| (l.as_str(), *c))
      .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted
  }

  /// 截断或补齐到 `rows` 行
  pub fn rows(&self, rows: usize) -> Vec<CountRow> {
    let mut table: Vec<CountRow> = self
      .sorted()
      .into_iter()
      .take(rows)
      .map(|(label, count)| CountRow::Filled {
        label: label.to_string(),
        count,
      })
      .collect();
    table.resize(rows, CountRow::Empty);
    table
  }

  pub fn table(&self) -> Vec<CountRow> {
    self.rows(TABLE_ROWS)
  }

  pub fn total(&self) -> usize {
    self.entries.iter().map(|(_, c)| c).sum()
  }

  pub fn unique_classes(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Display for DetectionCounts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{:<20} {:>5}", "类别", "数量")?;
    for row in self.table() {
      match row {
        CountRow::Filled { label, count } => writeln!(f, "{:<20} {:>5}", label, count)?,
        CountRow::Empty => writeln!(f, "{:<20} {:>5}", "-", "")?,
      }
    }
    write!(
      f,
      "目标总数: {}，类别数: {}",
      self.total(),
      self.unique_classes()
    )
  }
}
