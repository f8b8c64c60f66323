// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 渲染输出
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame, pipeline::Detection};
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;

/// 渲染面。每个周期结束时调用一次，失败时保留上一次的画面。
pub trait Render {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型安装后通知画布尺寸（模型输入边长）
  fn set_canvas(&mut self, _canvas: Option<(u32, u32)>) {}

  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    counts: &DetectionCounts,
  ) -> Result<(), Self::Error>;
}

mod counts;
pub use self::counts::{CountRow, DetectionCounts, TABLE_ROWS};

#[cfg(feature = "draw")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "draw")]
  #[error("绘制配置错误: {0}")]
  DrawError(#[from] draw::DrawError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  /// 不落盘，只由观察者读取统计结果
  Discard,
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      "null" => Ok(OutputWrapper::Discard),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl OutputWrapper {
  #[cfg(feature = "draw")]
  pub fn with_style(self, style: &draw::DrawStyle) -> Result<Self, OutputError> {
    let draw = draw::Draw::from_style(style)?;
    Ok(match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        OutputWrapper::SaveImageFileOutput(output.with_draw(draw))
      }
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        OutputWrapper::DirectoryRecordOutput(output.with_draw(draw))
      }
      OutputWrapper::Discard => OutputWrapper::Discard,
    })
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  #[cfg_attr(
    not(any(feature = "save_image_file", feature = "directory_record")),
    allow(unused_variables)
  )]
  fn set_canvas(&mut self, canvas: Option<(u32, u32)>) {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.set_canvas(canvas),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.set_canvas(canvas),
      OutputWrapper::Discard => {}
    }
  }

  #[cfg_attr(
    not(any(feature = "save_image_file", feature = "directory_record")),
    allow(unused_variables)
  )]
  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    counts: &DetectionCounts,
  ) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, detections, counts)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, detections, counts)
        .map_err(OutputError::from),
      OutputWrapper::Discard => Ok(()),
    }
  }
}
