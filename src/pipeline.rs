// 该文件是 Kanjian （看见） 项目的一部分。
// src/pipeline.rs - 单帧检测流程
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

//! 一个检测周期：letterbox → 推理 → 解码 → NMS → 映射回原始帧。
//!
//! 推理与后处理拆成两步，调用方可以在推理返回后检查是否已被取消，
//! 也可以对缓存的原始张量只重跑后处理。

use thiserror::Error;
use tracing::debug;

use crate::{
  arena::{CycleArena, Tensor, TensorId},
  decode::{DecodeError, TensorDecoder},
  frame::Frame,
  letterbox::{Letterbox, LetterboxError, LetterboxTransform},
  model::{Labels, Model, ModelState},
  nms::{BBox, DEFAULT_IOU_THRESHOLD, non_max_suppression},
  remap::Remapper,
};

/// 原始帧像素坐标下的检测结果，只在一次渲染中存活
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub class_id: u32,
  pub label: String,
  pub score: f32,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("预处理失败: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("推理输出张量丢失")]
  MissingTensor,
}

/// 推理完成、尚未后处理的中间结果
#[derive(Debug, Clone, Copy)]
pub struct Inferred {
  pub tensor: TensorId,
  pub transform: LetterboxTransform,
}

#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
  iou_threshold: f32,
}

impl Default for Pipeline {
  fn default() -> Self {
    Self {
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

impl Pipeline {
  pub fn new(iou_threshold: f32) -> Self {
    Self { iou_threshold }
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  /// letterbox 并执行推理，输出张量留在 `arena` 中
  pub fn infer<M: Model>(
    &self,
    model: &mut ModelState<M>,
    frame: &Frame,
    arena: &mut CycleArena,
  ) -> Result<Inferred, PipelineError> {
    let letterbox = Letterbox::new(model.input_edge());
    let (input, transform) = letterbox.apply(&frame.image)?;

    let now = std::time::Instant::now();
    let tensor = model
      .net_mut()
      .infer(&input, arena)
      .map_err(|e| PipelineError::Inference(e.to_string()))?;
    debug!("帧 {} 推理耗时: {:.2?}", frame.index, now.elapsed());

    Ok(Inferred { tensor, transform })
  }

  /// 解码、NMS 并映射回原始帧坐标。`threshold` 是本周期读取的一次快照。
  pub fn postprocess(
    &self,
    decoder: &TensorDecoder,
    labels: &Labels,
    tensor: &Tensor,
    transform: &LetterboxTransform,
    threshold: f32,
  ) -> Result<Vec<Detection>, PipelineError> {
    let candidates = decoder.decode(tensor, threshold)?;
    let decoded = candidates.len();
    let kept = non_max_suppression(candidates, self.iou_threshold);
    debug!("解码 {} 个候选框，NMS 后保留 {} 个", decoded, kept.len());

    let remapper = Remapper::new(*transform);
    Ok(
      kept
        .into_iter()
        .map(|c| Detection {
          bbox: remapper.to_frame(&c.bbox),
          class_id: c.class_id,
          label: labels.name(c.class_id).to_string(),
          score: c.score,
        })
        .collect(),
    )
  }

  /// 完整跑一遍，不做取消检查
  pub fn run<M: Model>(
    &self,
    model: &mut ModelState<M>,
    frame: &Frame,
    arena: &mut CycleArena,
    threshold: f32,
  ) -> Result<Vec<Detection>, PipelineError> {
    let inferred = self.infer(model, frame, arena)?;
    let tensor = arena
      .get(inferred.tensor)
      .ok_or(PipelineError::MissingTensor)?;
    self.postprocess(
      model.decoder(),
      model.labels(),
      tensor,
      &inferred.transform,
      threshold,
    )
  }
}
