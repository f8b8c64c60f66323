// 该文件是 Kanjian （看见） 项目的一部分。
// src/letterbox.rs - 等比缩放与填充预处理
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

use image::{Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbNhwcFrame;

/// 填充区域使用的中性灰
pub const LETTERBOX_FILL: u8 = 114;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("输入帧面积为零: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("模型输入尺寸无效: {0}")]
  InvalidInputSize(u32),
}

/// 记录从原始帧到模型输入的变换，用于把检测框映射回去。
///
/// 填充在两侧对称分布，`pad_x`/`pad_y` 为左侧/上侧的填充像素数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub input_size: (u32, u32),
  pub frame_size: (u32, u32),
  resized: (u32, u32),
}

impl LetterboxTransform {
  pub fn compute(frame_w: u32, frame_h: u32, size: u32) -> Result<Self, LetterboxError> {
    if size == 0 {
      return Err(LetterboxError::InvalidInputSize(size));
    }
    if frame_w == 0 || frame_h == 0 {
      return Err(LetterboxError::EmptyFrame {
        width: frame_w,
        height: frame_h,
      });
    }

    let scale = size as f32 / frame_w.max(frame_h) as f32;
    let new_w = ((frame_w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((frame_h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    Ok(Self {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
      input_size: (size, size),
      frame_size: (frame_w, frame_h),
      resized: (new_w, new_h),
    })
  }

  /// 缩放后（未填充）图像的尺寸
  pub fn resized_size(&self) -> (u32, u32) {
    self.resized
  }

  pub fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
  }

  pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }
}

/// 等比缩放预处理器，输出边长为 `size` 的方形模型输入
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
  size: u32,
  fill: u8,
}

impl Letterbox {
  pub fn new(size: u32) -> Self {
    Self {
      size,
      fill: LETTERBOX_FILL,
    }
  }

  pub fn with_fill(mut self, fill: u8) -> Self {
    self.fill = fill;
    self
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn apply(&self, image: &RgbImage) -> Result<(RgbNhwcFrame, LetterboxTransform), LetterboxError> {
    let transform = LetterboxTransform::compute(image.width(), image.height(), self.size)?;
    let (new_w, new_h) = transform.resized_size();

    let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([self.fill; 3]));
    let resized = if (new_w, new_h) == image.dimensions() {
      image.clone()
    } else {
      image::imageops::resize(image, new_w, new_h, FilterType::Triangle)
    };
    image::imageops::replace(
      &mut canvas,
      &resized,
      transform.pad_x as i64,
      transform.pad_y as i64,
    );

    debug!(
      "letterbox: {}x{} -> {}x{}, 偏移 ({}, {})",
      image.width(),
      image.height(),
      new_w,
      new_h,
      transform.pad_x,
      transform.pad_y
    );

    Ok((RgbNhwcFrame::from(canvas), transform))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wide_frame_pads_vertically() {
    let t = LetterboxTransform::compute(1280, 720, 640).unwrap();
    assert_eq!(t.scale, 0.5);
    assert_eq!(t.resized_size(), (640, 360));
    assert_eq!(t.pad_x, 0.0);
    assert_eq!(t.pad_y, 140.0);
  }

  #[test]
  fn tall_frame_pads_horizontally() {
    let t = LetterboxTransform::compute(480, 960, 640).unwrap();
    assert_eq!(t.resized_size(), (320, 640));
    assert_eq!(t.pad_x, 160.0);
    assert_eq!(t.pad_y, 0.0);
  }

  #[test]
  fn one_pixel_strip_keeps_one_pixel() {
    let t = LetterboxTransform::compute(1, 5000, 640).unwrap();
    assert_eq!(t.resized_size().0, 1);
    assert_eq!(t.resized_size().1, 640);
  }

  #[test]
  fn zero_area_frame_is_rejected() {
    assert_eq!(
      LetterboxTransform::compute(0, 10, 640),
      Err(LetterboxError::EmptyFrame {
        width: 0,
        height: 10
      })
    );
  }

  #[test]
  fn forward_then_inverse_recovers_point() {
    let t = LetterboxTransform::compute(1920, 1080, 640).unwrap();
    let (ix, iy) = t.to_input(960.0, 540.0);
    let (fx, fy) = t.to_frame(ix, iy);
    assert!((fx - 960.0).abs() < 1e-3);
    assert!((fy - 540.0).abs() < 1e-3);
  }

  #[test]
  fn apply_fills_padding_with_gray() {
    let image = RgbImage::from_pixel(8, 4, Rgb([255, 0, 0]));
    let (input, t) = Letterbox::new(8).apply(&image).unwrap();
    assert_eq!(input.width(), 8);
    assert_eq!(input.height(), 8);
    assert_eq!(t.pad_y, 2.0);
    assert_eq!(input.pixel(0, 0), [LETTERBOX_FILL; 3]);
    assert_eq!(input.pixel(3, 4), [255, 0, 0]);
    assert_eq!(input.pixel(7, 7), [LETTERBOX_FILL; 3]);
  }
}
