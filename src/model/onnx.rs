// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ndarray::Array4;
use ort::{
  inputs,
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, info};

use super::{Backend, InputShape, Model, ModelArtifact, ModelError};
use crate::{
  arena::{CycleArena, TensorId},
  frame::RgbNhwcFrame,
};

const ONNX_FORMAT: &str = "onnx";

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("张量分配失败: {0}")]
  Arena(#[from] crate::arena::ArenaError),
  #[error("模型已释放")]
  Disposed,
}

/// 清单 `format` 为 `"onnx"` 时，唯一的分片即为 ONNX 计算图
#[derive(Debug, Clone, Copy)]
pub struct OnnxBackend {
  intra_threads: usize,
}

impl Default for OnnxBackend {
  fn default() -> Self {
    Self { intra_threads: 4 }
  }
}

impl OnnxBackend {
  pub fn with_intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }
}

/// 只有批次维度可以是动态的（负数），按 1 处理
fn to_dims(shape: &[i64]) -> Result<Vec<usize>, ModelError> {
  shape
    .iter()
    .enumerate()
    .map(|(i, &d)| match d {
      d if d > 0 => Ok(d as usize),
      d if d < 0 && i == 0 => Ok(1),
      _ => Err(ModelError::Backend(format!(
        "形状 {:?} 第 {} 维无效，仅支持动态批次维度",
        shape, i
      ))),
    })
    .collect()
}

impl Backend for OnnxBackend {
  type Model = OnnxModel;

  fn build(&self, artifact: &ModelArtifact) -> Result<Self::Model, ModelError> {
    let manifest = &artifact.manifest;
    if manifest.format.as_deref() != Some(ONNX_FORMAT) {
      return Err(ModelError::Backend(format!(
        "清单格式应为 {}, 实际为 {:?}",
        ONNX_FORMAT, manifest.format
      )));
    }
    let graph = match artifact.shards.as_slice() {
      [graph] => graph,
      shards => {
        return Err(ModelError::Backend(format!(
          "ONNX 模型应只有一个分片, 实际 {} 个",
          shards.len()
        )));
      }
    };

    let (input_name, input_dims) = manifest.input()?;
    let (output_name, output_dims) = manifest.output()?;
    let input_dims = to_dims(&input_dims)?;
    // [1, 3, H, W] 为 NCHW，否则视为 NHWC
    let nchw = input_dims.len() == 4 && input_dims[1] == 3;
    let input_shape = match input_dims.as_slice() {
      [b, 3, h, w] if nchw => InputShape::new(*b, *h, *w, 3),
      [b, h, w, c] => InputShape::new(*b, *h, *w, *c),
      _ => {
        return Err(ModelError::Backend(format!(
          "不支持的输入形状 {:?}",
          input_dims
        )));
      }
    };

    let output_shape = to_dims(&output_dims)?;

    info!(
      "创建 ONNX 会话: {} ({:.2} MB)",
      artifact.manifest_url,
      graph.len() as f64 / (1024.0 * 1024.0)
    );
    let backend_error = |e: &dyn std::fmt::Display| ModelError::Backend(e.to_string());
    let session = Session::builder()
      .map_err(|e| backend_error(&e))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| backend_error(&e))?
      .with_intra_threads(self.intra_threads)
      .map_err(|e| backend_error(&e))?
      .commit_from_memory(graph)
      .map_err(|e| backend_error(&e))?;

    Ok(OnnxModel {
      session: Some(session),
      input_name: input_name.to_string(),
      output_name: output_name.to_string(),
      input_shape,
      output_shape,
      nchw,
    })
  }
}

pub struct OnnxModel {
  session: Option<Session>,
  input_name: String,
  output_name: String,
  input_shape: InputShape,
  output_shape: Vec<usize>,
  nchw: bool,
}

impl Model for OnnxModel {
  type Error = OnnxError;

  fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  fn output_shape(&self) -> Vec<usize> {
    self.output_shape.clone()
  }

  fn infer(&mut self, input: &RgbNhwcFrame, arena: &mut CycleArena) -> Result<TensorId, Self::Error> {
    let (h, w) = (self.input_shape.height, self.input_shape.width);
    if (input.height(), input.width()) != (h, w) {
      return Err(OnnxError::InputMismatch {
        expected: (h, w),
        actual: (input.height(), input.width()),
      });
    }
    let session = self.session.as_mut().ok_or(OnnxError::Disposed)?;

    let array = if self.nchw {
      Array4::from_shape_vec((1, 3, h, w), input.to_nchw_f32())?
    } else {
      Array4::from_shape_vec((1, h, w, 3), input.to_nhwc_f32())?
    };
    let tensor = Value::from_array(array)?;

    debug!("执行 ONNX 推理");
    let outputs = session.run(inputs![self.input_name.as_str() => tensor])?;
    let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
    let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

    Ok(arena.alloc(shape, data.to_vec())?)
  }

  fn dispose(&mut self) {
    self.session = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dynamic_batch_maps_to_one() {
    assert_eq!(to_dims(&[-1, 3, 640, 640]).unwrap(), vec![1, 3, 640, 640]);
    assert_eq!(to_dims(&[1, 84, 8400]).unwrap(), vec![1, 84, 8400]);
  }

  #[test]
  fn dynamic_spatial_dims_are_rejected() {
    assert!(matches!(to_dims(&[-1, 3, -1, -1]), Err(ModelError::Backend(_))));
    assert!(matches!(to_dims(&[1, -1, 640, 640]), Err(ModelError::Backend(_))));
    assert!(matches!(to_dims(&[1, 3, 0, 640]), Err(ModelError::Backend(_))));
  }
}
