// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 输入源产生的一帧
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self::new(image, 0, 0)
  }
}

/// 模型输入缓冲区，NHWC 排布，u8
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  data: Box<[u8]>,
  width: usize,
  height: usize,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    Self::filled(height, width, 0)
  }

  pub fn filled(height: usize, width: usize, value: u8) -> Self {
    let data = vec![value; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      data,
      width,
      height,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  /// 转换为 NCHW 排布并归一化到 [0, 1]
  pub fn to_nchw_f32(&self) -> Vec<f32> {
    let plane = self.width * self.height;
    let mut out = vec![0f32; plane * RGB_CHANNELS];
    for (idx, px) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for c in 0..RGB_CHANNELS {
        out[c * plane + idx] = px[c] as f32 / 255.0;
      }
    }
    out
  }

  /// 转换为 NHWC 排布并归一化到 [0, 1]
  pub fn to_nhwc_f32(&self) -> Vec<f32> {
    self.data.iter().map(|&v| v as f32 / 255.0).collect()
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width: width as usize,
      height: height as usize,
    }
  }
}

impl From<&RgbNhwcFrame> for RgbImage {
  fn from(frame: &RgbNhwcFrame) -> Self {
    RgbImage::from_fn(frame.width as u32, frame.height as u32, |x, y| {
      image::Rgb(frame.pixel(x as usize, y as usize))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nchw_conversion_splits_planes() {
    let mut frame = RgbNhwcFrame::with_shape(1, 2);
    frame.as_mut().copy_from_slice(&[255, 0, 0, 0, 255, 0]);
    let chw = frame.to_nchw_f32();
    assert_eq!(chw, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
  }

  #[test]
  fn rgb_image_round_trip_keeps_pixels() {
    let image = RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8, y as u8, 7]));
    let frame = RgbNhwcFrame::from(image.clone());
    assert_eq!(frame.width(), 3);
    assert_eq!(frame.height(), 2);
    assert_eq!(frame.pixel(2, 1), [2, 1, 7]);
    let back: RgbImage = (&frame).into();
    assert_eq!(back, image);
  }
}
