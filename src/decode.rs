// 该文件是 Kanjian （看见） 项目的一部分。
// src/decode.rs - 模型输出张量解码
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  arena::Tensor,
  nms::{BBox, Candidate},
};

/// 检测头的输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
  /// 每行 `cx, cy, w, h, objectness, scores...`
  WithObjectness,
  /// 每行 `cx, cy, w, h, scores...`
  ClassScoresOnly,
}

impl TensorLayout {
  /// 类别分数之前的属性个数
  pub fn header_len(self) -> usize {
    match self {
      TensorLayout::WithObjectness => 5,
      TensorLayout::ClassScoresOnly => 4,
    }
  }
}

/// 张量在内存中的排布方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorOrientation {
  /// `(候选数, 属性数)`
  CandidateMajor,
  /// `(属性数, 候选数)`，YOLOv8/11 导出的默认形式
  AttributeMajor,
}

/// 边界框数值的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoxUnits {
  /// 以模型输入边长归一化到 [0, 1]
  #[default]
  Normalized,
  /// 模型输入像素
  Pixels,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("无法从形状 {shape:?} 推断 {num_classes} 类的输出布局")]
  UnresolvedLayout { shape: Vec<usize>, num_classes: usize },
  #[error("张量形状 {shape:?} 与预期的属性数 {attrs} 不符")]
  ShapeMismatch { shape: Vec<usize>, attrs: usize },
  #[error("张量数据长度 {len} 与形状 {shape:?} 不符")]
  LengthMismatch { shape: Vec<usize>, len: usize },
  #[error("类别数为零")]
  NoClasses,
}

/// 加载模型时确定一次的张量描述，之后每帧不再检查
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
  pub layout: TensorLayout,
  pub orientation: TensorOrientation,
  pub units: BoxUnits,
  pub num_classes: usize,
}

/// 去掉前导的 batch=1 维度，得到二维形状
fn squeeze_2d(shape: &[usize]) -> Option<(usize, usize)> {
  let mut dims = shape;
  while dims.len() > 2 && dims[0] == 1 {
    dims = &dims[1..];
  }
  match dims {
    [rows, cols] => Some((*rows, *cols)),
    _ => None,
  }
}

impl TensorSpec {
  pub fn attrs(&self) -> usize {
    self.layout.header_len() + self.num_classes
  }

  /// 根据输出形状与类别数推断布局与排布方向。
  /// `layout` 为 `Some` 时只检查该布局。
  pub fn resolve(
    shape: &[usize],
    num_classes: usize,
    layout: Option<TensorLayout>,
    units: BoxUnits,
  ) -> Result<Self, DecodeError> {
    if num_classes == 0 {
      return Err(DecodeError::NoClasses);
    }

    let unresolved = || DecodeError::UnresolvedLayout {
      shape: shape.to_vec(),
      num_classes,
    };
    let (d0, d1) = squeeze_2d(shape).ok_or_else(unresolved)?;

    let layouts: &[TensorLayout] = match layout {
      Some(TensorLayout::ClassScoresOnly) => &[TensorLayout::ClassScoresOnly],
      Some(TensorLayout::WithObjectness) => &[TensorLayout::WithObjectness],
      None => &[TensorLayout::ClassScoresOnly, TensorLayout::WithObjectness],
    };

    for orientation in [TensorOrientation::CandidateMajor, TensorOrientation::AttributeMajor] {
      let attrs = match orientation {
        TensorOrientation::CandidateMajor => d1,
        TensorOrientation::AttributeMajor => d0,
      };
      for &layout in layouts {
        if attrs == layout.header_len() + num_classes {
          debug!(
            "输出形状 {:?} 解析为 {:?} / {:?}",
            shape, layout, orientation
          );
          return Ok(Self {
            layout,
            orientation,
            units,
            num_classes,
          });
        }
      }
    }

    error!("无法解析输出形状 {:?}（类别数 {}）", shape, num_classes);
    Err(unresolved())
  }
}

/// 把原始输出张量解码为候选框，并立即丢弃低于阈值的行
#[derive(Debug, Clone, Copy)]
pub struct TensorDecoder {
  spec: TensorSpec,
  input_size: f32,
}

impl TensorDecoder {
  pub fn new(spec: TensorSpec, input_size: u32) -> Self {
    Self {
      spec,
      input_size: input_size as f32,
    }
  }

  pub fn spec(&self) -> &TensorSpec {
    &self.spec
  }

  pub fn decode(&self, tensor: &Tensor, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
    self.decode_raw(tensor.shape(), tensor.data(), threshold)
  }

  pub fn decode_raw(
    &self,
    shape: &[usize],
    data: &[f32],
    threshold: f32,
  ) -> Result<Vec<Candidate>, DecodeError> {
    let attrs = self.spec.attrs();
    let mismatch = || DecodeError::ShapeMismatch {
      shape: shape.to_vec(),
      attrs,
    };
    let (d0, d1) = squeeze_2d(shape).ok_or_else(mismatch)?;
    let rows = match self.spec.orientation {
      TensorOrientation::CandidateMajor if d1 == attrs => d0,
      TensorOrientation::AttributeMajor if d0 == attrs => d1,
      _ => return Err(mismatch()),
    };
    if data.len() != rows * attrs {
      return Err(DecodeError::LengthMismatch {
        shape: shape.to_vec(),
        len: data.len(),
      });
    }

    let at = |row: usize, attr: usize| match self.spec.orientation {
      TensorOrientation::CandidateMajor => data[row * attrs + attr],
      TensorOrientation::AttributeMajor => data[attr * rows + row],
    };
    let unit = match self.spec.units {
      BoxUnits::Normalized => self.input_size,
      BoxUnits::Pixels => 1.0,
    };
    let header = self.spec.layout.header_len();

    let mut candidates = Vec::new();
    for row in 0..rows {
      let objectness = match self.spec.layout {
        TensorLayout::WithObjectness => at(row, 4),
        TensorLayout::ClassScoresOnly => 1.0,
      };

      let mut best_score = f32::NEG_INFINITY;
      let mut best_class = 0usize;
      for class in 0..self.spec.num_classes {
        let score = at(row, header + class) * objectness;
        if score > best_score {
          best_score = score;
          best_class = class;
        }
      }

      // NaN 同样被丢弃
      if !(best_score >= threshold) {
        continue;
      }

      let bbox = BBox::from_center(
        at(row, 0) * unit,
        at(row, 1) * unit,
        at(row, 2) * unit,
        at(row, 3) * unit,
      );
      candidates.push(Candidate {
        bbox,
        class_id: best_class as u32,
        score: best_score,
      });
    }

    debug!(
      "解码 {} 行，阈值 {:.2} 后保留 {} 个候选",
      rows,
      threshold,
      candidates.len()
    );
    Ok(candidates)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec(layout: TensorLayout, orientation: TensorOrientation, num_classes: usize) -> TensorSpec {
    TensorSpec {
      layout,
      orientation,
      units: BoxUnits::Pixels,
      num_classes,
    }
  }

  #[test]
  fn resolve_attribute_major_yolo_output() {
    let spec = TensorSpec::resolve(&[1, 84, 8400], 80, None, BoxUnits::Pixels).unwrap();
    assert_eq!(spec.layout, TensorLayout::ClassScoresOnly);
    assert_eq!(spec.orientation, TensorOrientation::AttributeMajor);
  }

  #[test]
  fn resolve_candidate_major_with_objectness() {
    let spec = TensorSpec::resolve(&[1, 25200, 85], 80, None, BoxUnits::Normalized).unwrap();
    assert_eq!(spec.layout, TensorLayout::WithObjectness);
    assert_eq!(spec.orientation, TensorOrientation::CandidateMajor);
  }

  #[test]
  fn resolve_rejects_unknown_shape() {
    let err = TensorSpec::resolve(&[1, 10, 10], 80, None, BoxUnits::Pixels).unwrap_err();
    assert!(matches!(err, DecodeError::UnresolvedLayout { .. }));
  }

  #[test]
  fn decode_applies_argmax_and_threshold() {
    let decoder = TensorDecoder::new(
      spec(TensorLayout::ClassScoresOnly, TensorOrientation::CandidateMajor, 3),
      640,
    );
    #[rustfmt::skip]
    let data = [
      100.0, 100.0, 20.0, 40.0, 0.1, 0.8, 0.3,
      200.0, 200.0, 10.0, 10.0, 0.2, 0.1, 0.3,
    ];
    let out = decoder.decode_raw(&[2, 7], &data, 0.5).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_id, 1);
    assert_eq!(out[0].bbox, BBox::new(90.0, 80.0, 110.0, 120.0));
  }

  #[test]
  fn decode_multiplies_objectness() {
    let decoder = TensorDecoder::new(
      spec(TensorLayout::WithObjectness, TensorOrientation::CandidateMajor, 2),
      640,
    );
    let data = [10.0, 10.0, 4.0, 4.0, 0.5, 0.9, 0.2];
    let out = decoder.decode_raw(&[1, 1, 7], &data, 0.4).unwrap();
    assert_eq!(out.len(), 1);
    assert!((out[0].score - 0.45).abs() < 1e-6);
    let none = decoder.decode_raw(&[1, 1, 7], &data, 0.5).unwrap();
    assert!(none.is_empty());
  }

  #[test]
  fn decode_attribute_major_and_normalized_units() {
    let decoder = TensorDecoder::new(
      TensorSpec {
        layout: TensorLayout::ClassScoresOnly,
        orientation: TensorOrientation::AttributeMajor,
        units: BoxUnits::Normalized,
        num_classes: 1,
      },
      100,
    );
    // 两个候选，按属性排布
    #[rustfmt::skip]
    let data = [
      0.5, 0.2,
      0.5, 0.2,
      0.2, 0.1,
      0.2, 0.1,
      0.9, 0.3,
    ];
    let out = decoder.decode_raw(&[1, 5, 2], &data, 0.5).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].bbox, BBox::new(40.0, 40.0, 60.0, 60.0));
  }

  #[test]
  fn decode_drops_nan_scores() {
    let decoder = TensorDecoder::new(
      spec(TensorLayout::ClassScoresOnly, TensorOrientation::CandidateMajor, 1),
      640,
    );
    let data = [1.0, 1.0, 1.0, 1.0, f32::NAN];
    assert!(decoder.decode_raw(&[1, 5], &data, 0.01).unwrap().is_empty());
  }

  #[test]
  fn decode_rejects_wrong_length() {
    let decoder = TensorDecoder::new(
      spec(TensorLayout::ClassScoresOnly, TensorOrientation::CandidateMajor, 1),
      640,
    );
    let err = decoder.decode_raw(&[2, 5], &[0.0; 9], 0.5).unwrap_err();
    assert!(matches!(err, DecodeError::LengthMismatch { .. }));
  }
}
