// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use kanjian::{
  FromUrl,
  arena::BufferLedger,
  controller::Controller,
  input::{InputWrapper, Source},
  model::{ModelLoader, OnnxBackend, SchemeFetcher},
  output::OutputWrapper,
  pipeline::Pipeline,
  threshold::ConfidenceThreshold,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.resolve_config()?;
  if let Some(path) = &args.dump_config {
    config.to_toml_file(path)?;
    info!("配置已写入: {}", path.display());
  }

  info!("应用地址: {}", config.model.app_url);
  info!("模型名称: {}", config.model.name);
  info!("输入来源: {}", args.input);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    config.detection.confidence, config.detection.iou_threshold
  );

  let ledger = BufferLedger::new();
  let backend = OnnxBackend::default().with_intra_threads(config.model.intra_threads);
  let loader = ModelLoader::new(config.app_url()?, SchemeFetcher::default(), backend)
    .with_options(config.model_options()?)
    .with_ledger(ledger.clone())
    .with_warmup(config.model.warmup);

  let output_url = match &config.render.output {
    Some(output) => Url::parse(output)?,
    None => {
      warn!("未指定输出，检测结果只写入日志");
      Url::parse("null:")?
    }
  };
  info!("输出路径: {}", output_url);
  let output = OutputWrapper::from_url(&output_url)?;
  #[cfg(feature = "draw")]
  let output = output.with_style(&config.render.draw_style())?;

  let mut controller = Controller::new(loader, output)
    .with_pipeline(Pipeline::new(config.detection.iou_threshold))
    .with_ledger(ledger.clone())
    .with_threshold(ConfidenceThreshold::new(config.detection.confidence))
    .with_max_frames(config.detection.max_frames)
    .exit_on_close(true);

  controller.on_state_change(|state| info!("状态: {}", state));
  controller.on_counts(|counts| {
    if !counts.is_empty() {
      info!("检测到 {} 个对象:\n{}", counts.total(), counts);
    }
  });

  let handle = controller.handle();
  ctrlc::set_handler(move || {
    if let Err(e) = handle.shutdown() {
      error!("无法通知控制器退出: {}", e);
    }
  })?;

  controller.load_model(&config.model.name)?;

  let source = InputWrapper::from_url(&args.input)?;
  let streaming = source.is_streaming();
  controller.open_source(Box::new(source))?;

  if streaming {
    controller.run()?;
  } else {
    controller.run_pending();
  }

  info!("处理完成!");
  info!("总帧数: {}", controller.frames_rendered());
  info!(
    "张量分配 {} 次，释放 {} 次",
    ledger.allocated(),
    ledger.released()
  );

  Ok(())
}
