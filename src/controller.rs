// 该文件是 Kanjian （看见） 项目的一部分。
// src/controller.rs - 检测循环控制器
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

//! 控制器是模型状态、输入源和阈值的唯一持有者。
//!
//! 所有外部请求经由同一个 `mpsc` 队列进入，按顺序在 [`Controller::run`]
//! 所在线程上处理。流式输入源每处理完一帧就给自己投递下一帧事件，
//! 因此两帧之间的其他请求（切换、关闭、调整阈值）不会被饿死。

use std::sync::{
  Arc,
  mpsc::{self, Receiver, Sender},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  arena::{BufferLedger, CycleArena, Tensor},
  frame::Frame,
  input::{InputError, Source, SourceKind},
  letterbox::LetterboxTransform,
  model::{ModelError, ModelProvider, ModelState},
  output::{DetectionCounts, Render},
  pipeline::{Pipeline, PipelineError},
  threshold::ConfidenceThreshold,
};

mod event;
mod state;

pub use self::event::{ControllerEvent, ControllerHandle, Generation, SourceEvent};
pub use self::state::{ControllerState, InvalidTransition, Transition};

/// 流式输入源连续获取失败达到该次数后关闭
const MAX_ACQUISITION_FAILURES: u32 = 3;

#[derive(Error, Debug)]
pub enum ControllerError {
  #[error("已有输入源 {active} 处于打开状态")]
  SourceBusy { active: SourceKind },
  #[error("输入源获取失败: {0}")]
  Acquisition(#[from] InputError),
  #[error("输入源没有产生任何帧")]
  EmptySource,
  #[error("模型加载失败: {0}")]
  Model(#[from] ModelError),
  #[error("检测失败: {0}")]
  Inference(#[from] PipelineError),
  #[error("渲染失败: {0}")]
  Render(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("{0}")]
  State(#[from] InvalidTransition),
  #[error("控制器事件队列已断开")]
  Disconnected,
}

/// 单个检测周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
  Rendered { detections: usize },
  /// 推理期间代次发生变化，结果被丢弃
  Cancelled,
  /// 还没有可用的模型
  NoModel,
}

type StateObserver = Box<dyn FnMut(&ControllerState) + Send>;
type CountsObserver = Box<dyn FnMut(&DetectionCounts) + Send>;
type ErrorObserver = Box<dyn FnMut(&ControllerError) + Send>;

#[derive(Default)]
struct Observers {
  state: Vec<StateObserver>,
  counts: Vec<CountsObserver>,
  errors: Vec<ErrorObserver>,
}

impl Observers {
  fn notify_state(&mut self, state: &ControllerState) {
    self.state.iter_mut().for_each(|f| f(state));
  }

  fn notify_counts(&mut self, counts: &DetectionCounts) {
    self.counts.iter_mut().for_each(|f| f(counts));
  }

  fn notify_error(&mut self, error: &ControllerError) {
    self.errors.iter_mut().for_each(|f| f(error));
  }
}

/// 为阈值重算保留的推理输出
struct CachedTensor {
  tensor: Tensor,
  transform: LetterboxTransform,
}

struct ActiveSource {
  source: Box<dyn Source>,
  kind: SourceKind,
  streaming: bool,
  last_frame: Option<Frame>,
  cached: Option<CachedTensor>,
  failures: u32,
}

impl ActiveSource {
  fn new(source: Box<dyn Source>) -> Self {
    Self {
      kind: source.kind(),
      streaming: source.is_streaming(),
      source,
      last_frame: None,
      cached: None,
      failures: 0,
    }
  }
}

pub struct Controller<P: ModelProvider, R: Render> {
  provider: P,
  render: R,
  pipeline: Pipeline,
  ledger: Arc<BufferLedger>,
  threshold: ConfidenceThreshold,
  generation: Generation,
  state: ControllerState,
  model: Option<ModelState<P::Model>>,
  active: Option<ActiveSource>,
  sender: Sender<ControllerEvent>,
  events: Receiver<ControllerEvent>,
  observers: Observers,
  max_frames: Option<u64>,
  frames_rendered: u64,
  exit_on_close: bool,
  stopped: bool,
}

impl<P: ModelProvider, R: Render> Controller<P, R> {
  pub fn new(provider: P, render: R) -> Self {
    let (sender, events) = mpsc::channel();
    Self {
      provider,
      render,
      pipeline: Pipeline::default(),
      ledger: BufferLedger::new(),
      threshold: ConfidenceThreshold::default(),
      generation: Generation::default(),
      state: ControllerState::Idle,
      model: None,
      active: None,
      sender,
      events,
      observers: Observers::default(),
      max_frames: None,
      frames_rendered: 0,
      exit_on_close: false,
      stopped: false,
    }
  }

  pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
    self.pipeline = pipeline;
    self
  }

  pub fn with_ledger(mut self, ledger: Arc<BufferLedger>) -> Self {
    self.ledger = ledger;
    self
  }

  pub fn with_threshold(mut self, threshold: ConfidenceThreshold) -> Self {
    self.threshold = threshold;
    self
  }

  /// 渲染达到指定帧数后关闭输入源
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 输入源关闭（包括视频播放结束）后退出 [`Controller::run`]
  pub fn exit_on_close(mut self, exit: bool) -> Self {
    self.exit_on_close = exit;
    self
  }

  pub fn handle(&self) -> ControllerHandle {
    ControllerHandle {
      sender: self.sender.clone(),
      generation: self.generation.clone(),
      threshold: self.threshold.clone(),
    }
  }

  pub fn on_state_change(&mut self, f: impl FnMut(&ControllerState) + Send + 'static) {
    self.observers.state.push(Box::new(f));
  }

  pub fn on_counts(&mut self, f: impl FnMut(&DetectionCounts) + Send + 'static) {
    self.observers.counts.push(Box::new(f));
  }

  pub fn on_error(&mut self, f: impl FnMut(&ControllerError) + Send + 'static) {
    self.observers.errors.push(Box::new(f));
  }

  pub fn state(&self) -> ControllerState {
    self.state
  }

  pub fn threshold(&self) -> f32 {
    self.threshold.get()
  }

  pub fn ledger(&self) -> &Arc<BufferLedger> {
    &self.ledger
  }

  pub fn model_name(&self) -> Option<&str> {
    self.model.as_ref().map(|m| m.name())
  }

  pub fn active_source(&self) -> Option<SourceKind> {
    self.active.as_ref().map(|a| a.kind)
  }

  pub fn frames_rendered(&self) -> u64 {
    self.frames_rendered
  }

  pub fn render(&self) -> &R {
    &self.render
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped
  }

  pub fn load_model(&mut self, name: &str) -> Result<(), ControllerError> {
    self.generation.bump();
    self.do_load(name)
  }

  /// 已有输入源时返回 [`ControllerError::SourceBusy`]
  pub fn open_source(&mut self, source: Box<dyn Source>) -> Result<(), ControllerError> {
    self.do_open(source, false)
  }

  pub fn switch_source(&mut self, source: Box<dyn Source>) -> Result<(), ControllerError> {
    self.generation.bump();
    self.do_open(source, true)
  }

  pub fn close_source(&mut self) {
    self.generation.bump();
    self.do_close();
  }

  pub fn set_threshold(&mut self, value: f32) -> Result<f32, ControllerError> {
    let applied = self.threshold.set(value);
    self.do_threshold_changed()?;
    Ok(applied)
  }

  /// 阻塞处理事件，直到收到 `Shutdown`
  pub fn run(&mut self) -> Result<(), ControllerError> {
    info!("控制器开始运行");
    while !self.stopped {
      let event = self
        .events
        .recv()
        .map_err(|_| ControllerError::Disconnected)?;
      self.process(event);
    }
    info!("控制器停止，共渲染 {} 帧", self.frames_rendered);
    Ok(())
  }

  /// 处理队列中已有的事件（包括处理过程中新投递的），返回处理的数量
  pub fn run_pending(&mut self) -> usize {
    let mut processed = 0;
    while !self.stopped {
      match self.events.try_recv() {
        Ok(event) => {
          self.process(event);
          processed += 1;
        }
        Err(_) => break,
      }
    }
    processed
  }

  pub fn process(&mut self, event: ControllerEvent) {
    debug!("处理事件: {:?}", event);
    let result = match event {
      ControllerEvent::LoadModel(name) => self.do_load(&name),
      ControllerEvent::ThresholdChanged => self.do_threshold_changed(),
      ControllerEvent::Source(SourceEvent::Opened { source, replace }) => {
        self.do_open(source, replace)
      }
      ControllerEvent::Source(SourceEvent::FrameReady { generation }) => {
        self.do_next_frame(generation)
      }
      ControllerEvent::Source(SourceEvent::Closed) => {
        self.do_close();
        Ok(())
      }
      ControllerEvent::Shutdown => {
        info!("收到退出请求");
        self.stopped = true;
        Ok(())
      }
    };
    if let Err(e) = result {
      self.report(e);
    }
  }

  fn report(&mut self, error: ControllerError) {
    error!("{}", error);
    self.observers.notify_error(&error);
  }

  fn transition(&mut self, transition: Transition) -> Result<(), ControllerError> {
    let next = self.state.apply(transition)?;
    if next != self.state {
      debug!("状态 {} -> {}", self.state, next);
      self.state = next;
      self.observers.notify_state(&next);
    }
    Ok(())
  }

  fn schedule_next(&mut self) {
    let generation = self.generation.current();
    if self
      .sender
      .send(ControllerEvent::Source(SourceEvent::FrameReady { generation }))
      .is_err()
    {
      warn!("无法投递下一帧事件");
    }
  }

  fn do_load(&mut self, name: &str) -> Result<(), ControllerError> {
    let active = self.active.as_ref().map(|a| a.kind);
    self.transition(Transition::LoadRequested { active })?;
    info!("开始加载模型 {}", name);

    let result = {
      let state = &mut self.state;
      let observers = &mut self.observers;
      let mut on_progress = |p: f32| {
        if let Ok(next) = state.apply(Transition::LoadProgress(p)) {
          *state = next;
          observers.notify_state(&next);
        }
      };
      self.provider.load(name, &mut on_progress)
    };

    match result {
      Ok(model) => {
        if let Some(old) = self.model.take() {
          old.dispose();
        }
        let edge = model.input_edge();
        self.render.set_canvas(Some((edge, edge)));
        self.model = Some(model);
        // 旧模型的输出不能用于新模型
        if let Some(active) = self.active.as_mut() {
          active.cached = None;
        }
        self.transition(Transition::LoadSucceeded)?;
        self.resume()
      }
      Err(e) => {
        let has_model = self.model.is_some();
        self.transition(Transition::LoadFailed { has_model })?;
        if has_model && let Err(resume_error) = self.resume() {
          self.report(resume_error);
        }
        Err(e.into())
      }
    }
  }

  /// 模型加载结束后继续处理仍打开的输入源
  fn resume(&mut self) -> Result<(), ControllerError> {
    match self.active.as_ref().map(|a| a.streaming) {
      Some(true) => {
        self.schedule_next();
        Ok(())
      }
      Some(false) => self.evaluate_image().map(|_| ()),
      None => Ok(()),
    }
  }

  fn do_open(&mut self, mut source: Box<dyn Source>, replace: bool) -> Result<(), ControllerError> {
    let kind = source.kind();
    if !replace && let Some(active) = &self.active {
      return Err(ControllerError::SourceBusy {
        active: active.kind,
      });
    }

    // 图像在替换旧输入源之前先读取，失败时保持原状
    let first_frame = if source.is_streaming() {
      None
    } else {
      match source.next_frame() {
        Some(Ok(frame)) => Some(frame),
        failed => {
          if self.active.as_ref().is_some_and(|a| a.streaming) {
            self.schedule_next();
          }
          return Err(match failed {
            Some(Err(e)) => e.into(),
            _ => ControllerError::EmptySource,
          });
        }
      }
    };

    if let Some(old) = self.active.take() {
      info!("切换输入源: {} -> {}", old.kind, kind);
    } else {
      info!("打开输入源: {}", kind);
    }

    let has_model = self.model.is_some();
    self.transition(if replace {
      Transition::SourceSwitched { kind, has_model }
    } else {
      Transition::SourceOpened { kind, has_model }
    })?;

    let mut active = ActiveSource::new(source);
    active.last_frame = first_frame;
    let streaming = active.streaming;
    self.active = Some(active);

    if streaming {
      self.schedule_next();
      Ok(())
    } else {
      self.evaluate_image().map(|_| ())
    }
  }

  fn do_close(&mut self) {
    let Some(active) = self.active.take() else {
      return;
    };
    info!("关闭输入源: {}", active.kind);
    drop(active);
    if let Err(e) = self.transition(Transition::SourceClosed) {
      self.report(e);
    }
    if self.exit_on_close {
      self.stopped = true;
    }
  }

  fn do_threshold_changed(&mut self) -> Result<(), ControllerError> {
    debug!("置信度阈值: {:.2}", self.threshold.get());
    match self.active.as_ref() {
      Some(active) if !active.streaming => self.evaluate_image().map(|_| ()),
      // 流式输入在下一帧读取新阈值
      _ => Ok(()),
    }
  }

  fn do_next_frame(&mut self, generation: u64) -> Result<(), ControllerError> {
    if generation != self.generation.current() {
      debug!("丢弃过期的帧事件 (代次 {})", generation);
      return Ok(());
    }
    if self.model.is_none() {
      debug!("模型未就绪，等待加载完成");
      return Ok(());
    }
    let Some(active) = self.active.as_mut() else {
      return Ok(());
    };

    let frame = match active.source.next_frame() {
      None => {
        info!("输入源 {} 已结束", active.kind);
        self.generation.bump();
        self.do_close();
        return Ok(());
      }
      Some(Err(e)) => {
        active.failures += 1;
        if active.failures >= MAX_ACQUISITION_FAILURES {
          warn!("输入源 {} 连续 {} 次获取失败", active.kind, active.failures);
          self.generation.bump();
          self.do_close();
        } else {
          self.schedule_next();
        }
        return Err(e.into());
      }
      Some(Ok(frame)) => {
        active.failures = 0;
        frame
      }
    };

    let outcome = self.run_cycle(&frame, generation, false);
    if let Some(max) = self.max_frames
      && self.frames_rendered >= max
    {
      info!("已达到最大帧数 {}", max);
      self.generation.bump();
      self.do_close();
    }
    // 出错的帧不影响后续帧
    if self.generation.current() == generation && self.active.is_some() {
      self.schedule_next();
    }
    outcome.map(|_| ())
  }

  /// 图像输入：有缓存张量时只重跑后处理，否则完整跑一遍并缓存张量
  fn evaluate_image(&mut self) -> Result<CycleOutcome, ControllerError> {
    let has_cache = self.active.as_ref().is_some_and(|a| a.cached.is_some());
    if has_cache {
      return self.rerender_cached();
    }

    let Some(frame) = self.active.as_mut().and_then(|a| a.last_frame.take()) else {
      return Ok(CycleOutcome::NoModel);
    };
    let generation = self.generation.current();
    let outcome = self.run_cycle(&frame, generation, true);
    if let Some(active) = self.active.as_mut() {
      active.last_frame = Some(frame);
    }
    outcome
  }

  fn rerender_cached(&mut self) -> Result<CycleOutcome, ControllerError> {
    let (Some(model), Some(active)) = (self.model.as_ref(), self.active.as_ref()) else {
      return Ok(CycleOutcome::NoModel);
    };
    let (Some(cached), Some(frame)) = (&active.cached, &active.last_frame) else {
      return Ok(CycleOutcome::NoModel);
    };

    let threshold = self.threshold.get();
    let detections = self.pipeline.postprocess(
      model.decoder(),
      model.labels(),
      &cached.tensor,
      &cached.transform,
      threshold,
    )?;
    let counts = DetectionCounts::from_detections(&detections);
    self
      .render
      .render_result(frame, &detections, &counts)
      .map_err(|e| ControllerError::Render(Box::new(e)))?;
    debug!("阈值 {:.2} 重新渲染 {} 个目标", threshold, detections.len());
    self.observers.notify_counts(&counts);
    self.frames_rendered += 1;
    Ok(CycleOutcome::Rendered {
      detections: detections.len(),
    })
  }

  /// 一个完整周期。arena 在函数返回时释放本周期的全部张量，
  /// `retain` 为真时推理输出转入输入源缓存。
  fn run_cycle(
    &mut self,
    frame: &Frame,
    generation: u64,
    retain: bool,
  ) -> Result<CycleOutcome, ControllerError> {
    let Some(model) = self.model.as_mut() else {
      debug!("模型未就绪，跳过帧 {}", frame.index);
      return Ok(CycleOutcome::NoModel);
    };

    let mut arena = CycleArena::new(self.ledger.clone());
    let inferred = self.pipeline.infer(model, frame, &mut arena)?;
    if self.generation.current() != generation {
      debug!("帧 {} 的检测已被取消", frame.index);
      return Ok(CycleOutcome::Cancelled);
    }

    let threshold = self.threshold.get();
    let tensor = arena
      .get(inferred.tensor)
      .ok_or(PipelineError::MissingTensor)?;
    let detections = self.pipeline.postprocess(
      model.decoder(),
      model.labels(),
      tensor,
      &inferred.transform,
      threshold,
    )?;
    let counts = DetectionCounts::from_detections(&detections);
    self
      .render
      .render_result(frame, &detections, &counts)
      .map_err(|e| ControllerError::Render(Box::new(e)))?;
    self.observers.notify_counts(&counts);
    self.frames_rendered += 1;

    if retain && let Some(active) = self.active.as_mut() {
      active.cached = arena.retain(inferred.tensor).map(|tensor| CachedTensor {
        tensor,
        transform: inferred.transform,
      });
    }
    Ok(CycleOutcome::Rendered {
      detections: detections.len(),
    })
  }
}

impl<P: ModelProvider, R: Render> Drop for Controller<P, R> {
  fn drop(&mut self) {
    self.active = None;
    if let Some(model) = self.model.take() {
      model.dispose();
    }
  }
}
