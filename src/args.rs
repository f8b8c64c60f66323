// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use kanjian::config::{AppConfig, ConfigError};

/// Kanjian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件，命令行参数覆盖其中的同名字段
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 应用地址，模型目录 `<model>_web_model/` 相对它解析
  #[arg(long, value_name = "URL")]
  pub app_url: Option<Url>,

  /// 模型名称
  #[arg(long, value_name = "NAME")]
  pub model: Option<String>,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/photo.jpg
  /// - 视频（图像序列）: frames:///path/to/dir?fps=30
  /// - 摄像头: v4l:///dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 图片: image:///path/to/out.png
  /// - 记录目录: folder:///path/to/dir?record=name&always
  /// - 丢弃: null:
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 置信度阈值 (0.01 - 0.9)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// 最大处理帧数（仅对视频/摄像头有效）
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 标签字体文件（TTF/OTF）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 将合并后的配置写入该文件
  #[arg(long, value_name = "FILE")]
  pub dump_config: Option<PathBuf>,
}

impl Args {
  /// 读取配置文件（若有）并应用命令行覆盖
  pub fn resolve_config(&self) -> Result<AppConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => AppConfig::from_toml_file(path)?,
      None => AppConfig::default(),
    };

    if let Some(app_url) = &self.app_url {
      config.model.app_url = app_url.to_string();
    }
    if let Some(model) = &self.model {
      config.model.name = model.clone();
    }
    if let Some(output) = &self.output {
      config.render.output = Some(output.to_string());
    }
    if let Some(confidence) = self.confidence {
      config.detection.confidence = confidence;
    }
    if let Some(iou) = self.iou_threshold {
      config.detection.iou_threshold = iou;
    }
    if let Some(max_frames) = self.max_frames {
      config.detection.max_frames = Some(max_frames);
    }
    if let Some(font) = &self.font {
      config.render.font = Some(font.clone());
    }

    config.validate()?;
    Ok(config)
  }
}
