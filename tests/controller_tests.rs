// 该文件是 Kanjian （看见） 项目的一部分。
// tests/controller_tests.rs - 检测循环控制器测试
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

mod common;

use std::sync::{Arc, Mutex};

use kanjian::{
  controller::{Controller, ControllerError, ControllerState},
  input::SourceKind,
};

use common::{EDGE, MockProvider, MockRender, MockSource, Tracker, frame};

fn controller() -> (Controller<MockProvider, MockRender>, Tracker) {
  let tracker = Tracker::default();
  let controller = Controller::new(MockProvider::new(tracker.clone()), MockRender::default());
  (controller, tracker)
}

fn loaded() -> (Controller<MockProvider, MockRender>, Tracker) {
  let (mut controller, tracker) = controller();
  controller.load_model("yolo11n").unwrap();
  (controller, tracker)
}

#[test]
fn load_installs_model_and_sets_canvas() {
  let (mut controller, _) = controller();
  let states = Arc::new(Mutex::new(Vec::new()));
  let seen = states.clone();
  controller.on_state_change(move |s| seen.lock().unwrap().push(*s));

  controller.load_model("yolo11n").unwrap();

  assert_eq!(controller.state(), ControllerState::Ready);
  assert_eq!(controller.model_name(), Some("yolo11n"));
  assert_eq!(controller.render().canvas, Some((EDGE, EDGE)));

  let states = states.lock().unwrap();
  assert!(states.contains(&ControllerState::Loading {
    progress: 0.5,
    resume: None
  }));
  assert_eq!(states.last(), Some(&ControllerState::Ready));
}

#[test]
fn image_renders_once_and_threshold_reuses_tensor() {
  let (mut controller, tracker) = loaded();
  controller.open_source(Box::new(MockSource::image(7))).unwrap();

  assert_eq!(controller.state(), ControllerState::Detecting(SourceKind::Image));
  assert_eq!(tracker.infers(), 1);
  let first = controller.render().last().unwrap();
  assert_eq!(first.frame_index, 7);
  // 两个重叠的 person 只保留 0.9
  assert_eq!(first.detections.len(), 2);
  assert_eq!(first.counts.get("person"), 1);
  assert_eq!(first.counts.get("car"), 1);

  let applied = controller.set_threshold(0.7).unwrap();
  assert!((applied - 0.7).abs() < 1e-6);
  assert_eq!(tracker.infers(), 1);
  assert_eq!(controller.render().frames.len(), 2);
  let second = controller.render().last().unwrap();
  assert_eq!(second.detections.len(), 1);
  assert_eq!(second.detections[0].label, "person");
}

#[test]
fn cached_image_tensor_is_released_on_close() {
  let (mut controller, _) = loaded();
  controller.open_source(Box::new(MockSource::image(0))).unwrap();
  assert_eq!(controller.ledger().live(), 1);

  controller.close_source();
  assert_eq!(controller.ledger().live(), 0);
  assert_eq!(controller.state(), ControllerState::Idle);
  assert_eq!(controller.active_source(), None);
}

#[test]
fn second_source_is_rejected_while_one_is_open() {
  let (mut controller, _) = loaded();
  controller.open_source(Box::new(MockSource::image(0))).unwrap();

  let err = controller
    .open_source(Box::new(MockSource::video(3)))
    .unwrap_err();
  assert!(matches!(
    err,
    ControllerError::SourceBusy {
      active: SourceKind::Image
    }
  ));
  assert_eq!(controller.active_source(), Some(SourceKind::Image));
}

#[test]
fn switch_replaces_source_and_releases_cache() {
  let (mut controller, tracker) = loaded();
  controller.open_source(Box::new(MockSource::image(0))).unwrap();
  controller
    .switch_source(Box::new(MockSource::image(1)))
    .unwrap();

  assert_eq!(tracker.infers(), 2);
  assert_eq!(controller.ledger().live(), 1);
  assert_eq!(controller.render().last().unwrap().frame_index, 1);
}

#[test]
fn empty_image_is_reported_and_state_kept() {
  let (mut controller, _) = loaded();
  let err = controller
    .open_source(Box::new(MockSource::empty_image()))
    .unwrap_err();
  assert!(matches!(err, ControllerError::EmptySource));
  assert_eq!(controller.state(), ControllerState::Ready);
  assert_eq!(controller.active_source(), None);
}

#[test]
fn switching_mid_inference_discards_the_cycle() {
  let (mut controller, tracker) = loaded();
  let handle = controller.handle();
  let mut replacement = Some(MockSource::image(99));
  tracker.during_next_infer(move || {
    if let Some(source) = replacement.take() {
      handle.switch_source(Box::new(source)).unwrap();
    }
  });

  controller.open_source(Box::new(MockSource::video(5))).unwrap();
  controller.run_pending();

  // 视频第一帧的推理被取消，只有替换后的图像被渲染
  assert_eq!(tracker.infers(), 2);
  let frames = &controller.render().frames;
  assert_eq!(frames.len(), 1);
  assert_eq!(frames[0].frame_index, 99);
  assert_eq!(controller.state(), ControllerState::Detecting(SourceKind::Image));
  assert_eq!(controller.ledger().live(), 1);
}

#[test]
fn closing_mid_inference_leaves_no_buffers() {
  let (mut controller, tracker) = loaded();
  let handle = controller.handle();
  tracker.during_next_infer(move || handle.close_source().unwrap());

  controller.open_source(Box::new(MockSource::video(5))).unwrap();
  controller.run_pending();

  assert!(controller.render().frames.is_empty());
  assert_eq!(controller.state(), ControllerState::Idle);
  assert_eq!(controller.ledger().live(), 0);
}

#[test]
fn video_runs_to_exhaustion_then_idles() {
  let (mut controller, tracker) = loaded();
  controller.open_source(Box::new(MockSource::video(3))).unwrap();
  controller.run_pending();

  assert_eq!(tracker.infers(), 3);
  assert_eq!(controller.frames_rendered(), 3);
  let indices: Vec<u64> = controller
    .render()
    .frames
    .iter()
    .map(|r| r.frame_index)
    .collect();
  assert_eq!(indices, vec![0, 1, 2]);
  assert_eq!(controller.state(), ControllerState::Idle);
  assert_eq!(controller.ledger().live(), 0);
}

#[test]
fn failed_inference_skips_frame_and_keeps_streaming() {
  let (mut controller, tracker) = loaded();
  let errors = Arc::new(Mutex::new(0usize));
  let counter = errors.clone();
  controller.on_error(move |_| *counter.lock().unwrap() += 1);

  tracker.fail_next_infer();
  controller.open_source(Box::new(MockSource::video(3))).unwrap();
  controller.run_pending();

  assert_eq!(*errors.lock().unwrap(), 1);
  assert_eq!(tracker.infers(), 3);
  assert_eq!(controller.frames_rendered(), 2);
  assert_eq!(controller.ledger().live(), 0);
  assert_eq!(controller.ledger().allocated(), 3);
}

#[test]
fn repeated_acquisition_failures_close_the_camera() {
  let (mut controller, tracker) = loaded();
  let errors = Arc::new(Mutex::new(Vec::new()));
  let seen = errors.clone();
  controller.on_error(move |e| seen.lock().unwrap().push(e.to_string()));

  let source = MockSource::camera(vec![Some(frame(0)), None, None, None, Some(frame(4))]);
  controller.open_source(Box::new(source)).unwrap();
  controller.run_pending();

  assert_eq!(tracker.infers(), 1);
  assert_eq!(errors.lock().unwrap().len(), 3);
  assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn single_acquisition_failure_is_tolerated() {
  let (mut controller, _) = loaded();
  let source = MockSource::camera(vec![Some(frame(0)), None, Some(frame(2))]);
  controller.open_source(Box::new(source)).unwrap();
  controller.run_pending();

  assert_eq!(controller.frames_rendered(), 2);
}

#[test]
fn max_frames_closes_the_stream() {
  let tracker = Tracker::default();
  let mut controller = Controller::new(MockProvider::new(tracker.clone()), MockRender::default())
    .with_max_frames(Some(4));
  controller.load_model("yolo11n").unwrap();
  controller.open_source(Box::new(MockSource::video(10))).unwrap();
  controller.run_pending();

  assert_eq!(controller.frames_rendered(), 4);
  assert_eq!(tracker.infers(), 4);
  assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn failed_load_keeps_previous_model() {
  let (mut controller, tracker) = loaded();
  controller.open_source(Box::new(MockSource::image(0))).unwrap();

  let err = controller.load_model("broken").unwrap_err();
  assert!(matches!(err, ControllerError::Model(_)));
  assert_eq!(controller.model_name(), Some("yolo11n"));
  assert_eq!(controller.state(), ControllerState::Detecting(SourceKind::Image));
  // 缓存张量仍属于旧模型，不需要重新推理
  assert_eq!(tracker.infers(), 1);
}

#[test]
fn failed_first_load_returns_to_idle() {
  let (mut controller, _) = controller();
  assert!(controller.load_model("broken").is_err());
  assert_eq!(controller.state(), ControllerState::Idle);
  assert_eq!(controller.model_name(), None);
}

#[test]
fn source_opened_before_model_waits_for_load() {
  let (mut controller, tracker) = controller();
  controller.open_source(Box::new(MockSource::image(3))).unwrap();
  assert_eq!(controller.state(), ControllerState::Idle);
  assert_eq!(tracker.infers(), 0);

  controller.load_model("yolo11n").unwrap();
  assert_eq!(controller.state(), ControllerState::Detecting(SourceKind::Image));
  assert_eq!(controller.render().last().unwrap().frame_index, 3);
}

#[test]
fn reload_reinfers_open_image() {
  let (mut controller, tracker) = loaded();
  controller.open_source(Box::new(MockSource::image(0))).unwrap();
  controller.load_model("yolo11s").unwrap();

  assert_eq!(tracker.infers(), 2);
  assert_eq!(controller.model_name(), Some("yolo11s"));
  assert_eq!(controller.ledger().live(), 1);
}

#[test]
fn events_from_handle_are_processed_in_order() {
  let (mut controller, tracker) = controller();
  let handle = controller.handle();
  handle.load_model("yolo11n").unwrap();
  handle.open_source(Box::new(MockSource::image(5))).unwrap();
  handle.set_threshold(0.8).unwrap();
  handle.close_source().unwrap();
  handle.shutdown().unwrap();

  controller.run().unwrap();

  assert!(controller.is_stopped());
  assert_eq!(tracker.infers(), 1);
  assert_eq!(controller.frames_rendered(), 2);
  assert_eq!(controller.render().last().unwrap().detections.len(), 1);
  assert_eq!(controller.state(), ControllerState::Idle);
  assert!((handle.threshold() - 0.8).abs() < 1e-6);
}

#[test]
fn run_exits_when_stream_ends() {
  let tracker = Tracker::default();
  let mut controller =
    Controller::new(MockProvider::new(tracker), MockRender::default()).exit_on_close(true);
  controller.load_model("yolo11n").unwrap();
  controller.open_source(Box::new(MockSource::video(2))).unwrap();

  controller.run().unwrap();
  assert_eq!(controller.frames_rendered(), 2);
  assert!(controller.is_stopped());
}

#[test]
fn counts_observer_receives_each_render() {
  let (mut controller, _) = loaded();
  let totals = Arc::new(Mutex::new(Vec::new()));
  let seen = totals.clone();
  controller.on_counts(move |counts| seen.lock().unwrap().push(counts.total()));

  controller.open_source(Box::new(MockSource::image(0))).unwrap();
  controller.set_threshold(0.7).unwrap();

  assert_eq!(*totals.lock().unwrap(), vec![2, 1]);
}
