// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/frame_directory.rs - 以图像序列表示的视频输入
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

//! 视频不在本项目中解码，而是以解码好的帧目录提供：`frames:///dir?fps=25`。
//! 目录下的图像按文件名排序，读完即视为视频结束。

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::{InputError, Source, SourceKind};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

const DEFAULT_FPS: f64 = 30.0;
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum FrameDirectoryError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("帧率无效: {0}")]
  InvalidFps(String),
  #[error("目录 {0} 中没有图像帧")]
  Empty(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("帧 {path} 解码失败: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

pub struct FrameDirectoryInput {
  frames: Vec<PathBuf>,
  cursor: usize,
  fps: f64,
}

impl FromUrlWithScheme for FrameDirectoryInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for FrameDirectoryInput {
  type Error = FrameDirectoryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FrameDirectoryError::SchemaMismatch);
    }

    let fps = match url.query_pairs().find(|(k, _)| k == "fps") {
      Some((_, v)) => match v.parse::<f64>() {
        Ok(fps) if fps > 0.0 && fps.is_finite() => fps,
        _ => return Err(FrameDirectoryError::InvalidFps(v.into_owned())),
      },
      None => DEFAULT_FPS,
    };

    Self::open(PathBuf::from(url_file_path(url)), fps)
  }
}

impl FrameDirectoryInput {
  pub fn open(directory: PathBuf, fps: f64) -> Result<Self, FrameDirectoryError> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(&directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path.is_file()
          && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
      })
      .collect();
    if frames.is_empty() {
      return Err(FrameDirectoryError::Empty(directory));
    }
    frames.sort();
    info!(
      "帧目录 {}: {} 帧, {:.1} fps",
      directory.display(),
      frames.len(),
      fps
    );

    Ok(Self {
      frames,
      cursor: 0,
      fps,
    })
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }
}

impl Source for FrameDirectoryInput {
  fn kind(&self) -> SourceKind {
    SourceKind::Video
  }

  fn next_frame(&mut self) -> Option<Result<Frame, InputError>> {
    let path = self.frames.get(self.cursor)?.clone();
    let index = self.cursor as u64;
    self.cursor += 1;

    let timestamp_ms = (index as f64 * 1000.0 / self.fps) as u64;
    debug!("读取第 {} 帧: {}", index, path.display());
    Some(
      image::open(&path)
        .map(|image| Frame::new(image.into_rgb8(), index, timestamp_ms))
        .map_err(|source| FrameDirectoryError::Decode { path, source }.into()),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn frames_are_read_in_name_order_until_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    for (name, width) in [("0002.png", 2), ("0001.png", 1), ("0003.png", 3)] {
      RgbImage::new(width, 4).save(dir.path().join(name)).unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let url = Url::parse(&format!("frames://{}?fps=10", dir.path().display())).unwrap();
    let mut input = FrameDirectoryInput::from_url(&url).unwrap();
    assert_eq!(input.len(), 3);
    assert!(input.is_streaming());

    let widths: Vec<(u32, u64)> = std::iter::from_fn(|| input.next_frame())
      .map(|f| {
        let f = f.unwrap();
        (f.width(), f.timestamp_ms)
      })
      .collect();
    assert_eq!(widths, vec![(1, 0), (2, 100), (3, 200)]);
  }

  #[test]
  fn invalid_fps_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("frames://{}?fps=0", dir.path().display())).unwrap();
    assert!(matches!(
      FrameDirectoryInput::from_url(&url),
      Err(FrameDirectoryError::InvalidFps(_))
    ));
  }

  #[test]
  fn empty_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      FrameDirectoryInput::open(dir.path().to_path_buf(), 30.0),
      Err(FrameDirectoryError::Empty(_))
    ));
  }
}
