// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 测试用的模型、输入源与渲染面
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

#![allow(dead_code)]

use std::{
  collections::VecDeque,
  convert::Infallible,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use image::{Rgb, RgbImage};
use thiserror::Error;

use kanjian::{
  arena::{CycleArena, TensorId},
  frame::{Frame, RgbNhwcFrame},
  input::{InputError, Source, SourceKind},
  model::{InputShape, Labels, Model, ModelError, ModelOptions, ModelProvider, ModelState},
  output::{DetectionCounts, Render},
  pipeline::Detection,
};

pub const EDGE: u32 = 64;
pub const CLASSES: [&str; 2] = ["person", "car"];

/// `(cx, cy, w, h, person, car)`，以输入边长归一化
pub const ROWS: [[f32; 6]; 3] = [
  [0.50, 0.50, 0.25, 0.25, 0.9, 0.0],
  [0.52, 0.50, 0.25, 0.25, 0.6, 0.0],
  [0.20, 0.20, 0.10, 0.10, 0.0, 0.5],
];

pub type Hook = Box<dyn FnMut() + Send>;

/// 测试与模型共享的观测点
#[derive(Clone, Default)]
pub struct Tracker {
  pub infers: Arc<AtomicUsize>,
  pub fail_next: Arc<AtomicBool>,
  during_infer: Arc<Mutex<Option<Hook>>>,
}

impl Tracker {
  pub fn infers(&self) -> usize {
    self.infers.load(Ordering::SeqCst)
  }

  pub fn fail_next_infer(&self) {
    self.fail_next.store(true, Ordering::SeqCst);
  }

  /// 下一次推理执行期间调用一次
  pub fn during_next_infer(&self, hook: impl FnMut() + Send + 'static) {
    *self.during_infer.lock().unwrap() = Some(Box::new(hook));
  }
}

#[derive(Error, Debug)]
#[error("模拟推理失败")]
pub struct MockError;

pub struct MockModel {
  tracker: Tracker,
}

impl Model for MockModel {
  type Error = MockError;

  fn input_shape(&self) -> InputShape {
    InputShape::square(EDGE as usize)
  }

  fn output_shape(&self) -> Vec<usize> {
    vec![1, ROWS.len(), 6]
  }

  fn infer(&mut self, input: &RgbNhwcFrame, arena: &mut CycleArena) -> Result<TensorId, MockError> {
    assert_eq!(input.width(), EDGE as usize);
    assert_eq!(input.height(), EDGE as usize);
    self.tracker.infers.fetch_add(1, Ordering::SeqCst);

    let data: Vec<f32> = ROWS.iter().flatten().copied().collect();
    let id = arena
      .alloc(self.output_shape(), data)
      .map_err(|_| MockError)?;

    let hook = self.tracker.during_infer.lock().unwrap().take();
    if let Some(mut hook) = hook {
      hook();
    }
    if self.tracker.fail_next.swap(false, Ordering::SeqCst) {
      return Err(MockError);
    }
    Ok(id)
  }
}

/// 名为 `broken` 的模型加载失败，其余名称都成功
pub struct MockProvider {
  pub tracker: Tracker,
  pub loads: usize,
}

impl MockProvider {
  pub fn new(tracker: Tracker) -> Self {
    Self { tracker, loads: 0 }
  }
}

impl ModelProvider for MockProvider {
  type Model = MockModel;

  fn load(
    &mut self,
    name: &str,
    progress: &mut dyn FnMut(f32),
  ) -> Result<ModelState<MockModel>, ModelError> {
    self.loads += 1;
    progress(0.5);
    if name == "broken" {
      return Err(ModelError::Backend("权重损坏".to_string()));
    }
    let labels = Labels::new(CLASSES.iter().map(|s| s.to_string()).collect())?;
    let net = MockModel {
      tracker: self.tracker.clone(),
    };
    let state = ModelState::new(name, net, labels, &ModelOptions::default())?;
    progress(1.0);
    Ok(state)
  }
}

#[derive(Debug, Clone)]
pub struct Rendered {
  pub frame_index: u64,
  pub detections: Vec<Detection>,
  pub counts: DetectionCounts,
}

#[derive(Default)]
pub struct MockRender {
  pub canvas: Option<(u32, u32)>,
  pub frames: Vec<Rendered>,
}

impl MockRender {
  pub fn last(&self) -> Option<&Rendered> {
    self.frames.last()
  }
}

impl Render for MockRender {
  type Error = Infallible;

  fn set_canvas(&mut self, canvas: Option<(u32, u32)>) {
    self.canvas = canvas;
  }

  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    counts: &DetectionCounts,
  ) -> Result<(), Infallible> {
    self.frames.push(Rendered {
      frame_index: frame.index,
      detections: detections.to_vec(),
      counts: counts.clone(),
    });
    Ok(())
  }
}

/// `None` 项表示一次获取失败
pub struct MockSource {
  kind: SourceKind,
  frames: VecDeque<Option<Frame>>,
}

impl MockSource {
  pub fn image(index: u64) -> Self {
    Self {
      kind: SourceKind::Image,
      frames: VecDeque::from([Some(frame(index))]),
    }
  }

  pub fn video(count: u64) -> Self {
    Self {
      kind: SourceKind::Video,
      frames: (0..count).map(|i| Some(frame(i))).collect(),
    }
  }

  pub fn camera(frames: Vec<Option<Frame>>) -> Self {
    Self {
      kind: SourceKind::Camera,
      frames: frames.into(),
    }
  }

  pub fn empty_image() -> Self {
    Self {
      kind: SourceKind::Image,
      frames: VecDeque::new(),
    }
  }
}

impl Source for MockSource {
  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn next_frame(&mut self) -> Option<Result<Frame, InputError>> {
    self.frames.pop_front().map(|frame| {
      frame.ok_or_else(|| InputError::SchemeMismatch("模拟获取失败".to_string()))
    })
  }
}

/// 与模型输入同尺寸的帧，letterbox 为恒等变换
pub fn frame(index: u64) -> Frame {
  let image = RgbImage::from_pixel(EDGE, EDGE, Rgb([40, 80, 120]));
  Frame::new(image, index, index * 33)
}
