// 该文件是 Kanjian （看见） 项目的一部分。
// src/remap.rs - 检测框坐标还原
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

use crate::{letterbox::LetterboxTransform, nms::BBox};

/// 撤销 letterbox 变换，把模型输入空间的框映射回原始帧
#[derive(Debug, Clone, Copy)]
pub struct Remapper {
  transform: LetterboxTransform,
}

impl Remapper {
  pub fn new(transform: LetterboxTransform) -> Self {
    Self { transform }
  }

  pub fn transform(&self) -> &LetterboxTransform {
    &self.transform
  }

  /// 结果被限制在帧边界内，防止边缘处的浮点误差越界
  pub fn to_frame(&self, bbox: &BBox) -> BBox {
    let (fw, fh) = self.transform.frame_size;
    let (x1, y1) = self.transform.to_frame(bbox.x1, bbox.y1);
    let (x2, y2) = self.transform.to_frame(bbox.x2, bbox.y2);
    clamp_box(x1, y1, x2, y2, fw as f32, fh as f32)
  }
}

/// 当绘制画布与原始帧分辨率不同时，按轴缩放到画布坐标
pub fn to_canvas(bbox: &BBox, frame_size: (u32, u32), canvas_size: (u32, u32)) -> BBox {
  if frame_size == canvas_size || frame_size.0 == 0 || frame_size.1 == 0 {
    return *bbox;
  }
  let sx = canvas_size.0 as f32 / frame_size.0 as f32;
  let sy = canvas_size.1 as f32 / frame_size.1 as f32;
  clamp_box(
    bbox.x1 * sx,
    bbox.y1 * sy,
    bbox.x2 * sx,
    bbox.y2 * sy,
    canvas_size.0 as f32,
    canvas_size.1 as f32,
  )
}

fn clamp_box(x1: f32, y1: f32, x2: f32, y2: f32, w: f32, h: f32) -> BBox {
  let cx = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, w) };
  let cy = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, h) };
  BBox::new(cx(x1), cy(y1), cx(x2), cy(y2))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn box_returns_to_frame_space() {
    let t = LetterboxTransform::compute(1280, 720, 640).unwrap();
    let remapper = Remapper::new(t);
    // 帧内 (100,100)-(300,200) 在输入空间为 (50,190)-(150,240)
    let input_box = BBox::new(50.0, 190.0, 150.0, 240.0);
    let frame_box = remapper.to_frame(&input_box);
    assert_eq!(frame_box, BBox::new(100.0, 100.0, 300.0, 200.0));
  }

  #[test]
  fn padding_region_is_clamped() {
    let t = LetterboxTransform::compute(1280, 720, 640).unwrap();
    let remapper = Remapper::new(t);
    let frame_box = remapper.to_frame(&BBox::new(-5.0, 0.0, 645.0, 640.0));
    assert_eq!(frame_box, BBox::new(0.0, 0.0, 1280.0, 720.0));
  }

  #[test]
  fn canvas_scaling_is_per_axis() {
    let b = BBox::new(100.0, 100.0, 200.0, 300.0);
    let c = to_canvas(&b, (1000, 600), (500, 300));
    assert_eq!(c, BBox::new(50.0, 50.0, 100.0, 150.0));
    assert_eq!(to_canvas(&b, (640, 640), (640, 640)), b);
  }
}
