// 该文件是 Kanjian （看见） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 角点格式的边界框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 由中心点和宽高构造
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w * 0.5, cy - h * 0.5, cx + w * 0.5, cy + h * 0.5)
  }

  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn as_array(&self) -> [f32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

/// argmax 之后的候选框，坐标位于模型输入像素空间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: BBox,
  pub class_id: u32,
  pub score: f32,
}

/// 按类别分组做贪心 NMS。不同类别之间从不互相抑制；
/// 分数相同时保持输入顺序，先出现者优先。
pub fn non_max_suppression(candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
  if candidates.is_empty() {
    return candidates;
  }

  let total = candidates.len();
  let mut groups: BTreeMap<u32, Vec<Candidate>> = BTreeMap::new();
  for candidate in candidates {
    groups.entry(candidate.class_id).or_default().push(candidate);
  }

  let mut keep = Vec::new();
  for (_, mut group) in groups {
    // sort_by 是稳定排序
    group.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut suppressed = vec![false; group.len()];
    for i in 0..group.len() {
      if suppressed[i] {
        continue;
      }
      keep.push(group[i]);

      for j in (i + 1)..group.len() {
        if !suppressed[j] && group[i].bbox.iou(&group[j].bbox) > iou_threshold {
          suppressed[j] = true;
        }
      }
    }
  }

  debug!("NMS: {} -> {}", total, keep.len());
  keep
}
