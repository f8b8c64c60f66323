// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/manifest.rs - 模型清单（model.json）
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

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use super::Labels;

#[derive(Error, Debug)]
pub enum ManifestError {
  #[error("JSON 解析失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("清单中没有权重分片")]
  NoShards,
  #[error("清单缺少张量签名: {0}")]
  MissingSignature(&'static str),
  #[error("张量维度无效: {0}")]
  InvalidDim(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsGroup {
  pub paths: Vec<String>,
  #[serde(default)]
  pub weights: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DimSize {
  Number(i64),
  Text(String),
}

#[derive(Debug, Clone, Deserialize)]
struct Dim {
  #[serde(default)]
  size: Option<DimSize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TensorShapeProto {
  #[serde(default)]
  dim: Vec<Dim>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TensorInfo {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub dtype: Option<String>,
  #[serde(rename = "tensorShape", default)]
  tensor_shape: TensorShapeProto,
}

impl TensorInfo {
  /// 维度列表，未知维度记为 -1
  pub fn shape(&self) -> Result<Vec<i64>, ManifestError> {
    self
      .tensor_shape
      .dim
      .iter()
      .map(|d| match &d.size {
        None => Ok(-1),
        Some(DimSize::Number(n)) => Ok(*n),
        Some(DimSize::Text(s)) => s
          .parse::<i64>()
          .map_err(|_| ManifestError::InvalidDim(s.clone())),
      })
      .collect()
  }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Signature {
  #[serde(default)]
  pub inputs: BTreeMap<String, TensorInfo>,
  #[serde(default)]
  pub outputs: BTreeMap<String, TensorInfo>,
}

/// TensorFlow.js 图模型清单中流水线用到的部分
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
  #[serde(default)]
  pub format: Option<String>,
  #[serde(rename = "generatedBy", default)]
  pub generated_by: Option<String>,
  #[serde(rename = "modelTopology", default)]
  pub model_topology: Option<serde_json::Value>,
  #[serde(rename = "weightsManifest")]
  pub weights_manifest: Vec<WeightsGroup>,
  #[serde(default)]
  pub signature: Option<Signature>,
  #[serde(rename = "userDefinedMetadata", default)]
  pub user_defined_metadata: Option<serde_json::Value>,
}

/// 张量名去掉 `:0` 之类的输出序号
fn strip_port(name: &str) -> &str {
  name.split(':').next().unwrap_or(name)
}

impl ModelManifest {
  pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
    let manifest: ModelManifest = serde_json::from_slice(bytes)?;
    if manifest.shard_paths().is_empty() {
      return Err(ManifestError::NoShards);
    }
    Ok(manifest)
  }

  /// 按顺序列出所有权重分片的相对路径
  pub fn shard_paths(&self) -> Vec<&str> {
    self
      .weights_manifest
      .iter()
      .flat_map(|g| g.paths.iter().map(String::as_str))
      .collect()
  }

  fn first<'a>(
    map: Option<&'a BTreeMap<String, TensorInfo>>,
    what: &'static str,
  ) -> Result<(&'a str, &'a TensorInfo), ManifestError> {
    map
      .and_then(|m| m.iter().next())
      .map(|(k, v)| (strip_port(v.name.as_deref().unwrap_or(k)), v))
      .ok_or(ManifestError::MissingSignature(what))
  }

  /// 第一个输入张量的名称与形状
  pub fn input(&self) -> Result<(&str, Vec<i64>), ManifestError> {
    let (name, info) = Self::first(self.signature.as_ref().map(|s| &s.inputs), "inputs")?;
    Ok((name, info.shape()?))
  }

  /// 第一个输出张量的名称与形状
  pub fn output(&self) -> Result<(&str, Vec<i64>), ManifestError> {
    let (name, info) = Self::first(self.signature.as_ref().map(|s| &s.outputs), "outputs")?;
    Ok((name, info.shape()?))
  }

  /// 读取 `userDefinedMetadata.names`，支持数组或 `{"0": "person"}` 形式
  pub fn labels(&self) -> Option<Labels> {
    let names = self.user_defined_metadata.as_ref()?.get("names")?;
    let labels: Vec<String> = match names {
      serde_json::Value::Array(items) => items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<_>>()?,
      serde_json::Value::Object(map) => {
        let mut entries: Vec<(usize, String)> = map
          .iter()
          .map(|(k, v)| Some((k.parse().ok()?, v.as_str()?.to_string())))
          .collect::<Option<_>>()?;
        entries.sort_by_key(|(k, _)| *k);
        entries.into_iter().map(|(_, v)| v).collect()
      }
      _ => return None,
    };
    Labels::new(labels).ok()
  }
}
