// 该文件是 Kanjian （看见） 项目的一部分。
// src/describe.rs - 图像描述请求与回复
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

//! 只负责请求的准备和回复的解析，HTTP 传输由调用方完成。

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{codecs::jpeg::JpegEncoder, imageops};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 发送前图像长边的上限
pub const MAX_DIMENSION: u32 = 512;
pub const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescribeError {
  #[error("请求文本为空")]
  EmptyPrompt,
  #[error("没有选择图像")]
  MissingMedia,
  #[error("不支持的媒体类型: {0}")]
  UnsupportedMedia(String),
  #[error("无法解析图像: {0}")]
  InvalidImage(String),
  /// 远端返回的错误信息，原样透传
  #[error("{message}")]
  Api { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
  pub model: String,
  pub reasoning_effort: Option<String>,
  pub max_completion_tokens: u32,
}

impl Default for ChatOptions {
  fn default() -> Self {
    Self {
      model: "gpt-5-mini".to_string(),
      reasoning_effort: Some("minimal".to_string()),
      max_completion_tokens: 1000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeRequest {
  pub prompt: String,
  pub image_base64: String,
  pub mime_type: String,
}

/// 可以直接放进数据 URL 的图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMedia {
  pub base64: String,
  pub mime_type: String,
  /// 缩放后的尺寸，未缩放时为 `None`
  pub resized: Option<(u32, u32)>,
}

impl PreparedMedia {
  pub fn data_url(&self) -> String {
    format!("data:{};base64,{}", self.mime_type, self.base64)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
  pub prompt: String,
  pub media: PreparedMedia,
}

/// 长边超过 [`MAX_DIMENSION`] 时按比例缩放后的尺寸
pub fn target_size(width: u32, height: u32) -> Option<(u32, u32)> {
  if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
    return None;
  }
  let max = MAX_DIMENSION as f64;
  let scaled = |short: u32, long: u32| (((short as f64 * max) / long as f64).round() as u32).max(1);
  Some(if width > height {
    (MAX_DIMENSION, scaled(height, width))
  } else {
    (scaled(width, height), MAX_DIMENSION)
  })
}

fn reencode(base64: &str) -> Result<Option<(String, (u32, u32))>, String> {
  let bytes = STANDARD.decode(base64).map_err(|e| e.to_string())?;
  let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
  let Some((w, h)) = target_size(image.width(), image.height()) else {
    return Ok(None);
  };
  debug!("缩放图像 {}x{} -> {}x{}", image.width(), image.height(), w, h);

  let resized = imageops::resize(&image.to_rgb8(), w, h, imageops::FilterType::Triangle);
  let mut jpeg = Vec::new();
  JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
    .encode_image(&resized)
    .map_err(|e| e.to_string())?;
  Ok(Some((STANDARD.encode(&jpeg), (w, h))))
}

/// 视频与无法解码的图像直接拒绝；过大的图像缩放并转为 JPEG
pub fn prepare_media(base64: &str, mime_type: &str) -> Result<PreparedMedia, DescribeError> {
  if base64.is_empty() {
    return Err(DescribeError::MissingMedia);
  }
  if !mime_type.starts_with("image/") {
    return Err(DescribeError::UnsupportedMedia(mime_type.to_string()));
  }

  match reencode(base64) {
    Ok(Some((encoded, size))) => {
      info!(
        "图像已缩放到 {}x{}，base64 长度 {} -> {}",
        size.0,
        size.1,
        base64.len(),
        encoded.len()
      );
      Ok(PreparedMedia {
        base64: encoded,
        mime_type: "image/jpeg".to_string(),
        resized: Some(size),
      })
    }
    Ok(None) => Ok(PreparedMedia {
      base64: base64.to_string(),
      mime_type: mime_type.to_string(),
      resized: None,
    }),
    Err(e) => {
      warn!("图像处理失败: {}", e);
      Err(DescribeError::InvalidImage(e))
    }
  }
}

impl DescribeRequest {
  pub fn new(prompt: &str, image_base64: &str, mime_type: &str) -> Self {
    Self {
      prompt: prompt.to_string(),
      image_base64: image_base64.to_string(),
      mime_type: mime_type.to_string(),
    }
  }

  pub fn prepare(&self) -> Result<PreparedRequest, DescribeError> {
    let prompt = self.prompt.trim();
    if prompt.is_empty() {
      return Err(DescribeError::EmptyPrompt);
    }
    Ok(PreparedRequest {
      prompt: prompt.to_string(),
      media: prepare_media(&self.image_base64, &self.mime_type)?,
    })
  }
}

#[derive(Serialize)]
struct ImageUrl {
  url: String,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct Message {
  role: &'static str,
  content: Vec<ContentPart>,
}

#[derive(Serialize)]
struct ChatBody<'a> {
  model: &'a str,
  messages: Vec<Message>,
  #[serde(skip_serializing_if = "Option::is_none")]
  reasoning_effort: Option<&'a str>,
  max_completion_tokens: u32,
}

impl PreparedRequest {
  /// 聊天补全请求体
  pub fn chat_body(&self, options: &ChatOptions) -> serde_json::Value {
    let body = ChatBody {
      model: &options.model,
      messages: vec![Message {
        role: "user",
        content: vec![
          ContentPart::Text {
            text: self.prompt.clone(),
          },
          ContentPart::ImageUrl {
            image_url: ImageUrl {
              url: self.media.data_url(),
            },
          },
        ],
      }],
      reasoning_effort: options.reasoning_effort.as_deref(),
      max_completion_tokens: options.max_completion_tokens,
    };
    serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
  }
}

/// 解析远端回复。`status_text` 为 HTTP 状态描述，仅在错误体为空时使用。
pub fn parse_reply(status: u16, status_text: &str, body: &str) -> Result<String, DescribeError> {
  if !(200..300).contains(&status) {
    let message = match serde_json::from_str::<serde_json::Value>(body) {
      Ok(value) => value
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_default(),
      Err(_) => body.to_string(),
    };
    let message = if message.is_empty() {
      format!("HTTP {}: {}", status, status_text)
    } else {
      message
    };
    return Err(DescribeError::Api { message });
  }

  let value: serde_json::Value = serde_json::from_str(body).map_err(|_| DescribeError::Api {
    message: "Invalid JSON response from API".to_string(),
  })?;
  value
    .pointer("/choices/0/message")
    .filter(|m| m.is_object())
    .map(|m| {
      m.get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
    })
    .ok_or_else(|| DescribeError::Api {
      message: "Unexpected response structure from API".to_string(),
    })
}
