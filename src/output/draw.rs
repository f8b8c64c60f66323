// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 在画布上绘制检测框
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{frame::Frame, pipeline::Detection, remap::to_canvas};

const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: u32 = 2;
const PALETTE_SIZE: usize = 80;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("字体文件无效: {0}")]
  InvalidFont(PathBuf),
}

/// 绘制样式，`font` 为空时只画框不写标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawStyle {
  pub font: Option<PathBuf>,
  pub font_size: f32,
  pub thickness: u32,
}

impl Default for DrawStyle {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      thickness: BOX_THICKNESS,
    }
  }
}

pub fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|source| DrawError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))
}

pub struct Draw {
  canvas: Option<(u32, u32)>,
  font: Option<FontArc>,
  font_scale: PxScale,
  thickness: u32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      canvas: None,
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      thickness: BOX_THICKNESS,
      colors: (0..PALETTE_SIZE)
        .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
        .collect(),
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn from_style(style: &DrawStyle) -> Result<Self, DrawError> {
    let mut draw = Self {
      font_scale: PxScale::from(style.font_size),
      thickness: style.thickness.max(1),
      ..Self::default()
    };
    if let Some(path) = &style.font {
      draw.font = Some(load_font(path)?);
    }
    Ok(draw)
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  /// 设置画布尺寸，`None` 表示按原始帧尺寸绘制
  pub fn set_canvas(&mut self, canvas: Option<(u32, u32)>) {
    self.canvas = canvas;
  }

  pub fn canvas(&self) -> Option<(u32, u32)> {
    self.canvas
  }

  pub fn class_color(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 把帧缩放到画布，并在画布坐标下绘制所有检测框
  pub fn draw_detections(&self, frame: &Frame, detections: &[Detection]) -> RgbImage {
    let frame_size = (frame.width(), frame.height());
    let canvas_size = self.canvas.unwrap_or(frame_size);
    let mut image = if canvas_size == frame_size {
      frame.image.clone()
    } else {
      imageops::resize(
        &frame.image,
        canvas_size.0,
        canvas_size.1,
        imageops::FilterType::Triangle,
      )
    };

    for detection in detections {
      let bbox = to_canvas(&detection.bbox, frame_size, canvas_size);
      let label = format!("{} {:.2}", detection.label, detection.score);
      self.draw_box(
        &mut image,
        bbox.as_array(),
        &label,
        self.class_color(detection.class_id),
      );
    }
    debug!("绘制 {} 个检测框", detections.len());
    image
  }

  fn draw_box(&self, image: &mut RgbImage, bbox: [f32; 4], label: &str, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 向内加粗
    for t in 0..self.thickness as i32 {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };
    let (text_w, text_h) = text_size(self.font_scale, font, label);
    let label_h = text_h as i32 + 2 * LABEL_VERTICAL_PADDING;
    let label_y = (y_min - label_h).max(0);
    let label_w = (text_w as i32).min(w - x_min);
    if label_w > 0 && label_h > 0 {
      let rect = Rect::at(x_min, label_y).of_size(label_w as u32, label_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        x_min,
        label_y + LABEL_VERTICAL_PADDING,
        self.font_scale,
        font,
        label,
      );
    }
  }
}

/// 以文本形式记录检测结果，与原始帧图像放在一起
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn record(&self, detections: &[Detection], path: &Path) -> Result<(), std::io::Error> {
    let records: Vec<String> = detections
      .iter()
      .map(|d| {
        let name = if self.label_with_name {
          d.label.clone()
        } else {
          d.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, d.score, d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2
        )
      })
      .collect();
    let path = path.with_extension("txt");
    if let Err(e) = std::fs::write(&path, records.join("\n")) {
      warn!("写入检测记录 {} 失败: {}", path.display(), e);
      return Err(e);
    }
    Ok(())
  }
}
