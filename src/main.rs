// 该文件是 Jianshan （见山） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use jianshan::{
  FromUrl,
  engine::TractEngineBuilder,
  input::UrlSourceFactory,
  output::{Draw, OutputWrapper, Surface},
  task::{ConsoleNotifier, LoopController},
};

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.pipeline_config();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("置信度阈值: {}", config.decode.confidence_threshold);
  info!("NMS 阈值: {:?}", config.decode.nms_threshold);

  let engine_builder = TractEngineBuilder::from_url(&args.model)?;
  let mut output = OutputWrapper::from_url(&args.output)?;
  let draw = Draw::load(config.font.as_deref())?;
  output.set_surface(Surface::new(draw, config.surface_size));

  let controller = LoopController::new(
    config,
    UrlSourceFactory::new(args.input.clone()),
    engine_builder,
    output,
    ConsoleNotifier,
  );
  controller.stop_on_ctrlc()?;

  let summary = match controller.start() {
    Ok(summary) => summary,
    Err(e) => {
      // ConsoleNotifier 已经输出过告警，这里只设置退出码
      debug!("流水线失败: {:?}", e.kind());
      return Ok(ExitCode::from(e.kind().exit_code()));
    }
  };

  info!("处理完成!");
  info!("总帧数: {}", summary.frames);
  info!("总检测数: {}", summary.detections);
  if summary.inference_errors > 0 {
    info!("推理失败帧数: {}", summary.inference_errors);
  }
  if let Some(fps) = summary.last_fps {
    info!("最后 FPS: {:.2}", fps);
  }

  Ok(ExitCode::SUCCESS)
}
