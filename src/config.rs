// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 配置文件
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
  decode::{BoxUnits, TensorLayout},
  describe::ChatOptions,
  model::{Labels, LabelsError, ModelOptions, manifest_url},
  nms::DEFAULT_IOU_THRESHOLD,
  threshold::{CONFIDENCE_DEFAULT, CONFIDENCE_MAX, CONFIDENCE_MIN},
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {0} 失败: {1}")]
  FileReadError(PathBuf, std::io::Error),
  #[error("写入配置文件 {0} 失败: {1}")]
  FileWriteError(PathBuf, std::io::Error),
  #[error("配置解析失败: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("配置序列化失败: {0}")]
  SerializeError(#[from] toml::ser::Error),
  #[error("配置值无效: {0}")]
  InvalidValue(String),
  #[error("标签文件错误: {0}")]
  Labels(#[from] LabelsError),
}

/// 模型位置与输出格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
  /// 应用地址，模型目录相对它解析
  pub app_url: String,
  pub name: String,
  /// 为空时根据输出形状推断
  pub layout: Option<TensorLayout>,
  pub units: BoxUnits,
  /// `labels = [...]` 形式的 TOML 文件
  pub labels: Option<PathBuf>,
  pub intra_threads: usize,
  pub warmup: bool,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      app_url: "file:///srv/kanjian/index.html".to_string(),
      name: "yolo11n".to_string(),
      layout: None,
      units: BoxUnits::default(),
      labels: None,
      intra_threads: 4,
      warmup: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
  pub confidence: f32,
  pub iou_threshold: f32,
  /// 渲染这么多帧后停止
  pub max_frames: Option<u64>,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      confidence: CONFIDENCE_DEFAULT,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_frames: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
  /// 输出 URL，如 `image:///tmp/out.png` 或 `folder:///tmp/records?always`
  pub output: Option<String>,
  /// 标签字体，为空时只绘制边框
  pub font: Option<PathBuf>,
  pub font_size: f32,
  pub thickness: u32,
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      output: None,
      font: None,
      font_size: 16.0,
      thickness: 2,
    }
  }
}

#[cfg(feature = "draw")]
impl RenderConfig {
  pub fn draw_style(&self) -> crate::output::draw::DrawStyle {
    crate::output::draw::DrawStyle {
      font: self.font.clone(),
      font_size: self.font_size,
      thickness: self.thickness,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub model: ModelConfig,
  pub detection: DetectionConfig,
  pub render: RenderConfig,
  pub describe: ChatOptions,
}

impl AppConfig {
  pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)
      .map_err(|e| ConfigError::FileReadError(path.to_path_buf(), e))?;
    Self::from_toml_str(&content)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn to_toml_file(&self, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(self)?;
    std::fs::write(path, content).map_err(|e| ConfigError::FileWriteError(path.to_path_buf(), e))
  }

  pub fn app_url(&self) -> Result<Url, ConfigError> {
    Url::parse(&self.model.app_url)
      .map_err(|e| ConfigError::InvalidValue(format!("app_url {}: {}", self.model.app_url, e)))
  }

  /// 加载模型所需的选项，标签文件在这里读取
  pub fn model_options(&self) -> Result<ModelOptions, ConfigError> {
    let labels = match &self.model.labels {
      Some(path) => Some(Labels::from_toml_file(path)?),
      None => None,
    };
    Ok(ModelOptions {
      layout: self.model.layout,
      units: self.model.units,
      labels,
    })
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let app_url = self.app_url()?;
    manifest_url(&app_url, &self.model.name)
      .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

    if self.model.intra_threads == 0 {
      return Err(ConfigError::InvalidValue(
        "intra_threads 必须大于 0".to_string(),
      ));
    }

    let confidence = self.detection.confidence;
    if !(CONFIDENCE_MIN..=CONFIDENCE_MAX).contains(&confidence) {
      return Err(ConfigError::InvalidValue(format!(
        "confidence 必须在 {} 到 {} 之间，实际为 {}",
        CONFIDENCE_MIN, CONFIDENCE_MAX, confidence
      )));
    }

    let iou = self.detection.iou_threshold;
    if !(iou > 0.0 && iou <= 1.0) {
      return Err(ConfigError::InvalidValue(format!(
        "iou_threshold 必须在 (0, 1] 之间，实际为 {}",
        iou
      )));
    }

    if self.detection.max_frames == Some(0) {
      return Err(ConfigError::InvalidValue(
        "max_frames 必须大于 0".to_string(),
      ));
    }

    if let Some(output) = &self.render.output {
      Url::parse(output)
        .map_err(|e| ConfigError::InvalidValue(format!("output {}: {}", output, e)))?;
    }

    if self.render.font_size <= 0.0 || self.render.thickness == 0 {
      return Err(ConfigError::InvalidValue(
        "font_size 与 thickness 必须大于 0".to_string(),
      ));
    }

    Ok(())
  }
}
