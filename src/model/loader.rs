// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/loader.rs - 模型制品加载
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{Backend, Labels, ModelError, ModelManifest, ModelOptions, ModelProvider, ModelState};
use crate::arena::BufferLedger;

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("URL 无效: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("模型名称无效: {0:?}")]
  InvalidModelName(String),
  #[error("不支持的 URL 方案: {0}")]
  UnsupportedScheme(String),
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("HTTP 请求失败: {0}")]
  Http(String),
}

/// 按约定路径 `<应用目录>/<模型名>_web_model/model.json` 定位模型清单
pub fn manifest_url(app_url: &Url, model_name: &str) -> Result<Url, FetchError> {
  if model_name.is_empty()
    || model_name.contains(['/', '\\', '?', '#'])
    || model_name.contains("..")
  {
    return Err(FetchError::InvalidModelName(model_name.to_string()));
  }
  Ok(app_url.join(&format!("{}_web_model/model.json", model_name))?)
}

/// 获取模型制品中的单个文件
pub trait ArtifactFetcher {
  fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// 读取 `file://` URL
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl ArtifactFetcher for FileFetcher {
  fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
    if url.scheme() != "file" {
      return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
    }
    let path = url
      .to_file_path()
      .map_err(|_| FetchError::UnsupportedScheme(url.to_string()))?;
    std::fs::read(&path).map_err(|source| FetchError::Io {
      path: path.display().to_string(),
      source,
    })
  }
}

/// 通过 HTTP(S) 获取
#[cfg(feature = "http_fetch")]
#[derive(Debug, Default, Clone)]
pub struct HttpFetcher {
  client: reqwest::blocking::Client,
}

#[cfg(feature = "http_fetch")]
impl ArtifactFetcher for HttpFetcher {
  fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
    let response = self
      .client
      .get(url.as_str())
      .send()
      .and_then(|r| r.error_for_status())
      .map_err(|e| FetchError::Http(e.to_string()))?;
    let bytes = response
      .bytes()
      .map_err(|e| FetchError::Http(e.to_string()))?;
    Ok(bytes.to_vec())
  }
}

/// 根据 URL 方案分派
#[derive(Debug, Default, Clone)]
pub struct SchemeFetcher {
  file: FileFetcher,
  #[cfg(feature = "http_fetch")]
  http: HttpFetcher,
}

impl ArtifactFetcher for SchemeFetcher {
  fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
    match url.scheme() {
      "file" => self.file.fetch(url),
      #[cfg(feature = "http_fetch")]
      "http" | "https" => self.http.fetch(url),
      other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
  }
}

/// 清单与全部权重分片
#[derive(Debug, Clone)]
pub struct ModelArtifact {
  pub manifest_url: Url,
  pub manifest: ModelManifest,
  pub shards: Vec<Vec<u8>>,
}

pub struct ModelLoader<F, B> {
  app_url: Url,
  fetcher: F,
  backend: B,
  options: ModelOptions,
  ledger: Arc<BufferLedger>,
  warmup: bool,
}

impl<F: ArtifactFetcher, B: Backend> ModelLoader<F, B> {
  pub fn new(app_url: Url, fetcher: F, backend: B) -> Self {
    Self {
      app_url,
      fetcher,
      backend,
      options: ModelOptions::default(),
      ledger: BufferLedger::new(),
      warmup: true,
    }
  }

  pub fn with_options(mut self, options: ModelOptions) -> Self {
    self.options = options;
    self
  }

  pub fn with_ledger(mut self, ledger: Arc<BufferLedger>) -> Self {
    self.ledger = ledger;
    self
  }

  pub fn with_warmup(mut self, warmup: bool) -> Self {
    self.warmup = warmup;
    self
  }

  /// 获取清单和分片，进度按已完成文件数报告
  pub fn fetch_artifact(
    &self,
    name: &str,
    progress: &mut dyn FnMut(f32),
  ) -> Result<ModelArtifact, ModelError> {
    let manifest_url = manifest_url(&self.app_url, name)?;
    info!("加载模型清单: {}", manifest_url);
    progress(0.0);

    let manifest = ModelManifest::parse(&self.fetcher.fetch(&manifest_url)?)?;
    let paths: Vec<String> = manifest.shard_paths().into_iter().map(str::to_string).collect();
    let steps = (paths.len() + 1) as f32;
    progress(1.0 / steps);

    let mut shards = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
      let shard_url = manifest_url.join(path).map_err(FetchError::from)?;
      let data = self.fetcher.fetch(&shard_url)?;
      debug!(
        "分片 {}/{}: {} ({:.2} MB)",
        i + 1,
        paths.len(),
        shard_url,
        data.len() as f64 / (1024.0 * 1024.0)
      );
      shards.push(data);
      progress((i + 2) as f32 / steps);
    }

    Ok(ModelArtifact {
      manifest_url,
      manifest,
      shards,
    })
  }
}

impl<F: ArtifactFetcher, B: Backend> ModelProvider for ModelLoader<F, B> {
  type Model = B::Model;

  fn load(
    &mut self,
    name: &str,
    progress: &mut dyn FnMut(f32),
  ) -> Result<ModelState<Self::Model>, ModelError> {
    let artifact = self.fetch_artifact(name, progress)?;
    let net = self.backend.build(&artifact)?;

    let labels = match (&self.options.labels, artifact.manifest.labels()) {
      (Some(labels), _) => labels.clone(),
      (None, Some(labels)) => labels,
      (None, None) => {
        warn!("模型清单未提供类别名称，使用 COCO 标签");
        Labels::coco()
      }
    };

    let mut state = ModelState::new(name, net, labels, &self.options)?;
    if self.warmup {
      if let Err(e) = state.warmup(&self.ledger) {
        state.dispose();
        return Err(e);
      }
    }
    progress(1.0);
    info!("模型 {} 加载完成", name);
    Ok(state)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use super::*;
  use crate::{
    arena::{CycleArena, TensorId},
    frame::RgbNhwcFrame,
    model::{InputShape, Model},
  };

  const MANIFEST: &str = r#"{
    "format": "test",
    "weightsManifest": [{"paths": ["weights.bin"]}],
    "signature": {
      "inputs": {"images": {"tensorShape": {"dim": [{"size": "1"}, {"size": "32"}, {"size": "32"}, {"size": "3"}]}}},
      "outputs": {"output0": {"tensorShape": {"dim": [{"size": "1"}, {"size": "6"}, {"size": "10"}]}}}
    },
    "userDefinedMetadata": {"names": ["person", "car"]}
  }"#;

  struct MemoryFetcher(HashMap<String, Vec<u8>>);

  impl MemoryFetcher {
    fn new() -> Self {
      let mut files = HashMap::new();
      files.insert(
        "file:///srv/app/yolo11n_web_model/model.json".to_string(),
        MANIFEST.as_bytes().to_vec(),
      );
      files.insert(
        "file:///srv/app/yolo11n_web_model/weights.bin".to_string(),
        vec![0; 16],
      );
      Self(files)
    }
  }

  impl ArtifactFetcher for MemoryFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
      self
        .0
        .get(url.as_str())
        .cloned()
        .ok_or_else(|| FetchError::InvalidModelName(url.to_string()))
    }
  }

  #[derive(thiserror::Error, Debug)]
  #[error("推理失败")]
  struct CountingError;

  struct CountingModel {
    edge: usize,
    disposed: Arc<AtomicUsize>,
  }

  impl Model for CountingModel {
    type Error = CountingError;

    fn input_shape(&self) -> InputShape {
      InputShape::new(1, self.edge, 32, 3)
    }

    fn output_shape(&self) -> Vec<usize> {
      vec![1, 6, 10]
    }

    fn infer(&mut self, _: &RgbNhwcFrame, _: &mut CycleArena) -> Result<TensorId, CountingError> {
      Err(CountingError)
    }

    fn dispose(&mut self) {
      self.disposed.fetch_add(1, Ordering::SeqCst);
    }
  }

  /// `edge` 不为 32 时输入不是方形
  struct CountingBackend {
    edge: usize,
    disposed: Arc<AtomicUsize>,
  }

  impl Backend for CountingBackend {
    type Model = CountingModel;

    fn build(&self, _: &ModelArtifact) -> Result<CountingModel, ModelError> {
      Ok(CountingModel {
        edge: self.edge,
        disposed: self.disposed.clone(),
      })
    }
  }

  fn loader(edge: usize, disposed: &Arc<AtomicUsize>) -> ModelLoader<MemoryFetcher, CountingBackend> {
    let backend = CountingBackend {
      edge,
      disposed: disposed.clone(),
    };
    ModelLoader::new(Url::parse("file:///srv/app/").unwrap(), MemoryFetcher::new(), backend)
  }

  #[test]
  fn unresolvable_shape_disposes_built_model() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut loader = loader(16, &disposed).with_warmup(false);
    let result = loader.load("yolo11n", &mut |_: f32| {});
    assert!(matches!(result, Err(ModelError::NonSquareInput(_))));
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn failed_warmup_disposes_built_model() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut loader = loader(32, &disposed);
    let result = loader.load("yolo11n", &mut |_: f32| {});
    assert!(matches!(result, Err(ModelError::Warmup(_))));
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn loaded_model_is_not_disposed() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut loader = loader(32, &disposed).with_warmup(false);
    let state = loader.load("yolo11n", &mut |_: f32| {}).unwrap();
    assert_eq!(state.input_edge(), 32);
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn manifest_url_is_relative_to_app_directory() {
    let app = Url::parse("https://example.org/demo/index.html").unwrap();
    let url = manifest_url(&app, "yolo11n").unwrap();
    assert_eq!(
      url.as_str(),
      "https://example.org/demo/yolo11n_web_model/model.json"
    );

    let dir = Url::parse("file:///srv/app/").unwrap();
    assert_eq!(
      manifest_url(&dir, "yolo11s").unwrap().as_str(),
      "file:///srv/app/yolo11s_web_model/model.json"
    );
  }

  #[test]
  fn traversal_in_model_name_is_rejected() {
    let app = Url::parse("file:///srv/app/").unwrap();
    assert!(matches!(
      manifest_url(&app, "../secret"),
      Err(FetchError::InvalidModelName(_))
    ));
    assert!(matches!(
      manifest_url(&app, ""),
      Err(FetchError::InvalidModelName(_))
    ));
  }

  #[test]
  fn file_fetcher_rejects_other_schemes() {
    let url = Url::parse("ftp://example.org/model.json").unwrap();
    assert!(matches!(
      FileFetcher.fetch(&url),
      Err(FetchError::UnsupportedScheme(_))
    ));
  }
}
