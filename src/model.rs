// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  arena::{ArenaError, BufferLedger, CycleArena, TensorId},
  decode::{BoxUnits, DecodeError, TensorDecoder, TensorLayout, TensorSpec},
  frame::RgbNhwcFrame,
};

mod labels;
mod loader;
mod manifest;
#[cfg(feature = "onnx")]
mod onnx;

pub use self::labels::{COCO_CLASSES, Labels, LabelsError};
pub use self::loader::{
  ArtifactFetcher, FetchError, FileFetcher, ModelArtifact, ModelLoader, SchemeFetcher, manifest_url,
};
#[cfg(feature = "http_fetch")]
pub use self::loader::HttpFetcher;
pub use self::manifest::{ManifestError, ModelManifest};
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxModel};

/// 推理运行时。模型内部如何执行（CPU/GPU、权重加载）对流水线不可见，
/// 只需要输入缓冲区和输出张量。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型输入形状
  fn input_shape(&self) -> InputShape;

  /// 检测头输出张量的形状，用于加载时解析布局
  fn output_shape(&self) -> Vec<usize>;

  /// 执行推理，输出张量分配在 `arena` 中
  fn infer(&mut self, input: &RgbNhwcFrame, arena: &mut CycleArena) -> Result<TensorId, Self::Error>;

  /// 释放后端持有的内存
  fn dispose(&mut self) {}
}

/// 从模型制品构建推理运行时
pub trait Backend {
  type Model: Model;

  fn build(&self, artifact: &ModelArtifact) -> Result<Self::Model, ModelError>;
}

/// `(batch, height, width, channels)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl InputShape {
  pub fn new(batch: usize, height: usize, width: usize, channels: usize) -> Self {
    Self {
      batch,
      height,
      width,
      channels,
    }
  }

  pub fn square(size: usize) -> Self {
    Self::new(1, size, size, 3)
  }

  /// 方形输入的边长
  pub fn edge(&self) -> Result<u32, ModelError> {
    if self.height != self.width || self.height == 0 {
      return Err(ModelError::NonSquareInput(*self));
    }
    Ok(self.height as u32)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型制品获取失败: {0}")]
  Fetch(#[from] FetchError),
  #[error("模型清单无效: {0}")]
  Manifest(#[from] ManifestError),
  #[error("标签加载失败: {0}")]
  Labels(#[from] LabelsError),
  #[error("输出布局无法解析: {0}")]
  Layout(#[from] DecodeError),
  #[error("张量分配失败: {0}")]
  Arena(#[from] ArenaError),
  #[error("模型输入不是方形: {0:?}")]
  NonSquareInput(InputShape),
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型预热失败: {0}")]
  Warmup(String),
}

/// 加载模型时的可选配置
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
  pub layout: Option<TensorLayout>,
  pub units: BoxUnits,
  pub labels: Option<Labels>,
}

/// 当前唯一存活的模型实例
pub struct ModelState<M: Model> {
  name: String,
  net: M,
  input_shape: InputShape,
  decoder: TensorDecoder,
  labels: Labels,
}

impl<M: Model> std::fmt::Debug for ModelState<M> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelState")
      .field("name", &self.name)
      .field("input_shape", &self.input_shape)
      .field("spec", self.decoder.spec())
      .finish()
  }
}

impl<M: Model> ModelState<M> {
  /// 组装模型状态，输出布局在这里解析一次
  /// 形状无法解析时 `net` 会先被释放
  pub fn new(name: &str, mut net: M, labels: Labels, options: &ModelOptions) -> Result<Self, ModelError> {
    let input_shape = net.input_shape();
    let output_shape = net.output_shape();
    let resolved = input_shape.edge().and_then(|edge| {
      let spec = TensorSpec::resolve(&output_shape, labels.len(), options.layout, options.units)?;
      Ok((edge, spec))
    });
    let (edge, spec) = match resolved {
      Ok(resolved) => resolved,
      Err(e) => {
        net.dispose();
        return Err(e);
      }
    };
    info!(
      "模型 {}: 输入 {:?}, 输出 {:?}, 布局 {:?}",
      name, input_shape, output_shape, spec.layout
    );

    Ok(Self {
      name: name.to_string(),
      net,
      input_shape,
      decoder: TensorDecoder::new(spec, edge),
      labels,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  /// 模型输入边长，也是绘制画布的边长
  pub fn input_edge(&self) -> u32 {
    self.input_shape.height as u32
  }

  pub fn decoder(&self) -> &TensorDecoder {
    &self.decoder
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn net_mut(&mut self) -> &mut M {
    &mut self.net
  }

  /// 用全 1 输入跑一次推理，输出立即释放
  pub fn warmup(&mut self, ledger: &Arc<BufferLedger>) -> Result<(), ModelError> {
    let edge = self.input_edge() as usize;
    let dummy = RgbNhwcFrame::filled(edge, edge, 1);
    let mut arena = CycleArena::new(ledger.clone());
    let now = std::time::Instant::now();
    self
      .net
      .infer(&dummy, &mut arena)
      .map_err(|e| ModelError::Warmup(e.to_string()))?;
    debug!("模型预热完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }

  /// 显式释放后端内存
  pub fn dispose(mut self) {
    info!("释放模型 {}", self.name);
    self.net.dispose();
  }
}

/// 控制器通过该接口获取模型，便于替换加载方式
pub trait ModelProvider {
  type Model: Model;

  fn load(
    &mut self,
    name: &str,
    progress: &mut dyn FnMut(f32),
  ) -> Result<ModelState<Self::Model>, ModelError>;
}
