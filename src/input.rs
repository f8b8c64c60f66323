// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 输入源
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

use std::fmt;

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod frame_directory;
mod read_image_file;
#[cfg(feature = "v4l_input")]
mod v4l_input;

pub use self::frame_directory::{FrameDirectoryError, FrameDirectoryInput};
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

/// 同一时刻只允许一种输入处于打开状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
  Image,
  Camera,
  Video,
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SourceKind::Image => "image",
      SourceKind::Camera => "camera",
      SourceKind::Video => "video",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("帧目录输入错误: {0}")]
  FrameDirectoryError(#[from] FrameDirectoryError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 帧的来源。图像只产生一帧；摄像头和视频持续产生，返回 `None` 表示结束。
pub trait Source: Send {
  fn kind(&self) -> SourceKind;

  fn next_frame(&mut self) -> Option<Result<Frame, InputError>>;

  fn is_streaming(&self) -> bool {
    self.kind() != SourceKind::Image
  }
}

impl<S: Source + ?Sized> Source for Box<S> {
  fn kind(&self) -> SourceKind {
    (**self).kind()
  }

  fn next_frame(&mut self) -> Option<Result<Frame, InputError>> {
    (**self).next_frame()
  }

  fn is_streaming(&self) -> bool {
    (**self).is_streaming()
  }
}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  FrameDirectory(FrameDirectoryInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      FrameDirectoryInput::SCHEME => Ok(InputWrapper::FrameDirectory(
        FrameDirectoryInput::from_url(url)?,
      )),
      #[cfg(feature = "v4l_input")]
      V4lInput::SCHEME => Ok(InputWrapper::V4l(V4lInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Source for InputWrapper {
  fn kind(&self) -> SourceKind {
    match self {
      InputWrapper::ImageFile(input) => input.kind(),
      InputWrapper::FrameDirectory(input) => input.kind(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.kind(),
    }
  }

  fn next_frame(&mut self) -> Option<Result<Frame, InputError>> {
    match self {
      InputWrapper::ImageFile(input) => input.next_frame(),
      InputWrapper::FrameDirectory(input) => input.next_frame(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.next_frame(),
    }
  }
}
