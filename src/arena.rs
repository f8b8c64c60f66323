// 该文件是 Kanjian （看见） 项目的一部分。
// src/arena.rs - 单次检测周期的张量缓冲区管理
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

//! 推理输出张量都从 [`CycleArena`] 分配。周期结束（包括出错和取消）时
//! arena 被丢弃，其中所有张量随之释放；[`BufferLedger`] 统计分配与释放次数，
//! 用于发现泄漏。

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArenaError {
  #[error("张量形状 {shape:?} 与数据长度 {len} 不匹配")]
  ShapeMismatch { shape: Vec<usize>, len: usize },
}

/// 全局缓冲区账本
#[derive(Debug, Default)]
pub struct BufferLedger {
  allocated: AtomicUsize,
  released: AtomicUsize,
}

impl BufferLedger {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn allocated(&self) -> usize {
    self.allocated.load(Ordering::Acquire)
  }

  pub fn released(&self) -> usize {
    self.released.load(Ordering::Acquire)
  }

  /// 当前仍存活的缓冲区数量
  pub fn live(&self) -> usize {
    self.allocated().saturating_sub(self.released())
  }
}

/// 受账本跟踪的 f32 张量，丢弃时自动登记释放
#[derive(Debug)]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
  ledger: Arc<BufferLedger>,
}

impl Tensor {
  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl Drop for Tensor {
  fn drop(&mut self) {
    self.ledger.released.fetch_add(1, Ordering::AcqRel);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorId(usize);

/// 单个检测周期的张量 arena
#[derive(Debug)]
pub struct CycleArena {
  ledger: Arc<BufferLedger>,
  tensors: Vec<Option<Tensor>>,
}

impl CycleArena {
  pub fn new(ledger: Arc<BufferLedger>) -> Self {
    Self {
      ledger,
      tensors: Vec::new(),
    }
  }

  pub fn alloc(&mut self, shape: Vec<usize>, data: Vec<f32>) -> Result<TensorId, ArenaError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(ArenaError::ShapeMismatch {
        shape,
        len: data.len(),
      });
    }

    self.ledger.allocated.fetch_add(1, Ordering::AcqRel);
    self.tensors.push(Some(Tensor {
      shape,
      data,
      ledger: self.ledger.clone(),
    }));
    Ok(TensorId(self.tensors.len() - 1))
  }

  pub fn get(&self, id: TensorId) -> Option<&Tensor> {
    self.tensors.get(id.0).and_then(Option::as_ref)
  }

  /// 把张量移出 arena，使其存活超过当前周期
  pub fn retain(&mut self, id: TensorId) -> Option<Tensor> {
    self.tensors.get_mut(id.0).and_then(Option::take)
  }

  /// arena 中尚未释放的张量数量
  pub fn len(&self) -> usize {
    self.tensors.iter().filter(|t| t.is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn release_all(&mut self) {
    let count = self.len();
    self.tensors.clear();
    if count > 0 {
      debug!("释放 {} 个周期张量", count);
    }
  }
}

impl Drop for CycleArena {
  fn drop(&mut self) {
    self.release_all();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dropping_arena_releases_everything() {
    let ledger = BufferLedger::new();
    {
      let mut arena = CycleArena::new(ledger.clone());
      arena.alloc(vec![2, 3], vec![0.0; 6]).unwrap();
      arena.alloc(vec![4], vec![1.0; 4]).unwrap();
      assert_eq!(ledger.live(), 2);
    }
    assert_eq!(ledger.allocated(), 2);
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn retained_tensor_outlives_arena() {
    let ledger = BufferLedger::new();
    let kept = {
      let mut arena = CycleArena::new(ledger.clone());
      let id = arena.alloc(vec![1, 2], vec![0.5, 0.25]).unwrap();
      arena.retain(id).unwrap()
    };
    assert_eq!(ledger.live(), 1);
    assert_eq!(kept.data(), &[0.5, 0.25]);
    drop(kept);
    assert_eq!(ledger.live(), 0);
  }

  #[test]
  fn shape_mismatch_is_not_counted() {
    let ledger = BufferLedger::new();
    let mut arena = CycleArena::new(ledger.clone());
    let err = arena.alloc(vec![2, 2], vec![0.0; 3]).unwrap_err();
    assert_eq!(
      err,
      ArenaError::ShapeMismatch {
        shape: vec![2, 2],
        len: 3
      }
    );
    assert_eq!(ledger.allocated(), 0);
  }
}
