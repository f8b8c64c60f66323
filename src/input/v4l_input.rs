// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  prelude::*,
  video::Capture,
};

use super::{InputError, Source, SourceKind};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("采集缓冲区大小不符: {0} 字节")]
  BufferSize(usize),
}

/// 以 YUYV 采集并转换为 RGB 的摄像头
pub struct V4lInput {
  // 先于 device 释放
  stream: Stream<'static>,
  _device: Device,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

fn query_u32(url: &Url, key: &str, default: u32) -> u32 {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse().ok())
    .unwrap_or(default)
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0?width=640&height=480
    let device_path = match url_file_path(url) {
      path if path.is_empty() || path == "/" => DEFAULT_DEVICE.to_string(),
      path => path,
    };
    let device = Device::with_path(&device_path)?;

    let mut format = device.format()?;
    format.width = query_u32(url, "width", DEFAULT_WIDTH);
    format.height = query_u32(url, "height", DEFAULT_HEIGHT);
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    info!(
      "打开摄像头 {} ({}x{} {})",
      device_path, format.width, format.height, format.fourcc
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;

    Ok(V4lInput {
      stream,
      _device: device,
      width: format.width,
      height: format.height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl V4lInput {
  fn capture_frame(&mut self) -> Result<Frame, V4lInputError> {
    let (buffer, _meta) = self.stream.next()?;
    let rgb = yuyv_to_rgb(buffer, self.width, self.height);
    let len = rgb.len();
    let image = RgbImage::from_raw(self.width, self.height, rgb)
      .ok_or(V4lInputError::BufferSize(len))?;

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }
}

impl Source for V4lInput {
  fn kind(&self) -> SourceKind {
    SourceKind::Camera
  }

  /// 摄像头不会自行结束，只能由控制器关闭
  fn next_frame(&mut self) -> Option<Result<Frame, InputError>> {
    Some(self.capture_frame().map_err(InputError::from))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_maps_to_gray() {
    let rgb = yuyv_to_rgb(&[128, 128, 64, 128], 2, 1);
    assert_eq!(rgb, vec![128, 128, 128, 64, 64, 64]);
  }
}
