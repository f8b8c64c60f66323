// 该文件是 Kanjian （看见） 项目的一部分。
// src/controller/event.rs - 控制器事件与句柄
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

use std::{
  fmt,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
    mpsc::Sender,
  },
};

use tracing::debug;

use super::ControllerError;
use crate::{input::Source, threshold::ConfidenceThreshold};

/// 输入源生命周期事件
pub enum SourceEvent {
  /// `replace` 为真时替换当前输入源，否则当前有输入源时拒绝
  Opened {
    source: Box<dyn Source>,
    replace: bool,
  },
  /// 流式输入源的下一帧可以处理；过期的代次直接丢弃
  FrameReady { generation: u64 },
  Closed,
}

/// 控制器唯一的入站事件
pub enum ControllerEvent {
  LoadModel(String),
  ThresholdChanged,
  Source(SourceEvent),
  Shutdown,
}

impl fmt::Debug for SourceEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceEvent::Opened { source, replace } => f
        .debug_struct("Opened")
        .field("kind", &source.kind())
        .field("replace", replace)
        .finish(),
      SourceEvent::FrameReady { generation } => f
        .debug_struct("FrameReady")
        .field("generation", generation)
        .finish(),
      SourceEvent::Closed => f.write_str("Closed"),
    }
  }
}

impl fmt::Debug for ControllerEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ControllerEvent::LoadModel(name) => f.debug_tuple("LoadModel").field(name).finish(),
      ControllerEvent::ThresholdChanged => f.write_str("ThresholdChanged"),
      ControllerEvent::Source(event) => f.debug_tuple("Source").field(event).finish(),
      ControllerEvent::Shutdown => f.write_str("Shutdown"),
    }
  }
}

/// 代次计数器。切换、关闭输入源和加载模型都会在事件入队之前递增，
/// 推理返回后代次不一致的周期直接丢弃。
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
  pub fn current(&self) -> u64 {
    self.0.load(Ordering::Acquire)
  }

  pub fn bump(&self) -> u64 {
    self.0.fetch_add(1, Ordering::AcqRel) + 1
  }
}

/// 可在其他线程（采集线程、信号处理）中使用的控制器句柄
#[derive(Clone)]
pub struct ControllerHandle {
  pub(super) sender: Sender<ControllerEvent>,
  pub(super) generation: Generation,
  pub(super) threshold: ConfidenceThreshold,
}

impl ControllerHandle {
  fn send(&self, event: ControllerEvent) -> Result<(), ControllerError> {
    debug!("投递事件: {:?}", event);
    self
      .sender
      .send(event)
      .map_err(|_| ControllerError::Disconnected)
  }

  pub fn load_model(&self, name: &str) -> Result<(), ControllerError> {
    self.generation.bump();
    self.send(ControllerEvent::LoadModel(name.to_string()))
  }

  pub fn open_source(&self, source: Box<dyn Source>) -> Result<(), ControllerError> {
    self.send(ControllerEvent::Source(SourceEvent::Opened {
      source,
      replace: false,
    }))
  }

  pub fn switch_source(&self, source: Box<dyn Source>) -> Result<(), ControllerError> {
    self.generation.bump();
    self.send(ControllerEvent::Source(SourceEvent::Opened {
      source,
      replace: true,
    }))
  }

  pub fn close_source(&self) -> Result<(), ControllerError> {
    self.generation.bump();
    self.send(ControllerEvent::Source(SourceEvent::Closed))
  }

  /// 立即生效；图像输入会用缓存的张量重新渲染
  pub fn set_threshold(&self, value: f32) -> Result<f32, ControllerError> {
    let applied = self.threshold.set(value);
    self.send(ControllerEvent::ThresholdChanged)?;
    Ok(applied)
  }

  pub fn threshold(&self) -> f32 {
    self.threshold.get()
  }

  pub fn shutdown(&self) -> Result<(), ControllerError> {
    self.send(ControllerEvent::Shutdown)
  }

  pub fn generation(&self) -> u64 {
    self.generation.current()
  }
}
