// 该文件是 Kanjian （看见） 项目的一部分。
// src/threshold.rs - 置信度阈值
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

use std::sync::{
  Arc,
  atomic::{AtomicU32, Ordering},
};

pub const CONFIDENCE_MIN: f32 = 0.01;
pub const CONFIDENCE_MAX: f32 = 0.9;
pub const CONFIDENCE_STEP: f32 = 0.01;
pub const CONFIDENCE_DEFAULT: f32 = 0.45;

/// 把任意输入收敛到滑块允许的取值：限制在 [0.01, 0.9] 并对齐到 0.01
pub fn snap_confidence(value: f32) -> f32 {
  if value.is_nan() {
    return CONFIDENCE_DEFAULT;
  }
  let stepped = (value / CONFIDENCE_STEP).round() * CONFIDENCE_STEP;
  stepped.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

/// 多处共享的置信度阈值，读写均为原子操作，不加锁
#[derive(Debug, Clone)]
pub struct ConfidenceThreshold {
  bits: Arc<AtomicU32>,
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    Self::new(CONFIDENCE_DEFAULT)
  }
}

impl ConfidenceThreshold {
  pub fn new(value: f32) -> Self {
    Self {
      bits: Arc::new(AtomicU32::new(snap_confidence(value).to_bits())),
    }
  }

  pub fn get(&self) -> f32 {
    f32::from_bits(self.bits.load(Ordering::Relaxed))
  }

  /// 设置阈值，返回实际生效的值
  pub fn set(&self, value: f32) -> f32 {
    let snapped = snap_confidence(value);
    self.bits.store(snapped.to_bits(), Ordering::Relaxed);
    snapped
  }
}
