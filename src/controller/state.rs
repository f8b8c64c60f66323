// 该文件是 Kanjian （看见） 项目的一部分。
// src/controller/state.rs - 控制器状态机
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

//! 状态转换是纯函数，不涉及模型、输入源或渲染。
//!
//! ```text
//! Idle ──load──▶ Loading ──ok──▶ Ready ──open──▶ Detecting(s) ──close──▶ Idle
//!                                  Detecting(a) ──switch──▶ Detecting(b)
//! ```

use std::fmt;

use thiserror::Error;

use crate::input::SourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ControllerState {
  /// 没有打开的输入源
  #[default]
  Idle,
  /// 正在加载模型；`resume` 为加载完成后继续检测的输入源
  Loading {
    progress: f32,
    resume: Option<SourceKind>,
  },
  /// 模型就绪，等待输入
  Ready,
  Detecting(SourceKind),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
  /// `active` 为当前已打开（可能尚未检测）的输入源
  LoadRequested { active: Option<SourceKind> },
  LoadProgress(f32),
  LoadSucceeded,
  LoadFailed { has_model: bool },
  SourceOpened { kind: SourceKind, has_model: bool },
  SourceSwitched { kind: SourceKind, has_model: bool },
  SourceClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("状态 {from} 不接受转换 {transition:?}")]
pub struct InvalidTransition {
  pub from: ControllerState,
  pub transition: Transition,
}

impl fmt::Display for ControllerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ControllerState::Idle => write!(f, "idle"),
      ControllerState::Loading { progress, .. } => write!(f, "loading({:.0}%)", progress * 100.0),
      ControllerState::Ready => write!(f, "ready"),
      ControllerState::Detecting(kind) => write!(f, "detecting({})", kind),
    }
  }
}

impl ControllerState {
  pub fn apply(self, transition: Transition) -> Result<ControllerState, InvalidTransition> {
    use ControllerState::*;
    use Transition::*;

    let next = match (self, transition) {
      (Loading { resume, .. }, LoadRequested { .. }) => Loading {
        progress: 0.0,
        resume,
      },
      (_, LoadRequested { active }) => Loading {
        progress: 0.0,
        resume: active,
      },

      (Loading { resume, .. }, LoadProgress(p)) => Loading {
        progress: p.clamp(0.0, 1.0),
        resume,
      },

      (Loading { resume, .. }, LoadSucceeded) => resume.map_or(Ready, Detecting),
      (Loading { resume, .. }, LoadFailed { has_model: true }) => resume.map_or(Ready, Detecting),
      (Loading { .. }, LoadFailed { has_model: false }) => Idle,

      (Loading { progress, .. }, SourceOpened { kind, .. } | SourceSwitched { kind, .. }) => {
        Loading {
          progress,
          resume: Some(kind),
        }
      }
      (Idle | Ready, SourceOpened { kind, has_model }) | (_, SourceSwitched { kind, has_model }) => {
        if has_model {
          Detecting(kind)
        } else {
          Idle
        }
      }

      (Detecting(_), SourceClosed) | (Idle, SourceClosed) => Idle,
      (Ready, SourceClosed) => Ready,
      (Loading { progress, .. }, SourceClosed) => Loading {
        progress,
        resume: None,
      },

      (from, transition) => return Err(InvalidTransition { from, transition }),
    };
    Ok(next)
  }

  pub fn is_loading(&self) -> bool {
    matches!(self, ControllerState::Loading { .. })
  }

  pub fn detecting(&self) -> Option<SourceKind> {
    match self {
      ControllerState::Detecting(kind) => Some(*kind),
      _ => None,
    }
  }
}
