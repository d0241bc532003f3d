// 该文件是 Jianshan （见山） 项目的一部分。
// src/bin/oneshot.rs - 单张图片推理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use jianshan::{
  FromUrl,
  config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MODEL_URI, PipelineConfig},
  engine::{Session, TractEngineBuilder},
  input::{FrameSource, ImageFileInput},
  model::OutputLayout,
  output::{Draw, OutputWrapper, Render, Surface},
  task::DetectionPipeline,
};

/// 对一张图片做一次检测，写出绘制结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径
  #[arg(long, value_name = "MODEL", default_value = DEFAULT_MODEL_URI)]
  pub model: Url,
  /// 输入图片，例如 image:samples/street.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "image:detections.png")]
  pub output: Url,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
  pub confidence: f32,
  /// 模型输出排布
  #[arg(long, value_enum, default_value_t = OutputLayout::EndToEnd)]
  pub layout: OutputLayout,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = PipelineConfig::default()
    .with_confidence_threshold(args.confidence)
    .with_layout(args.layout)
    .with_font(args.font);

  let mut input = ImageFileInput::from_url(&args.input)?;
  let frame = input
    .pull()?
    .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;

  let builder = TractEngineBuilder::from_url(&args.model)?;
  let session = Session::create(builder, config.input_shape)?;
  let pipeline = DetectionPipeline::new(session, &config);

  let mut output = OutputWrapper::from_url(&args.output)?;
  let draw = Draw::load(config.font.as_deref())?;
  // 单张图片按原图尺寸输出
  output.set_surface(Surface::new(draw, (frame.width(), frame.height())));

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = pipeline.detect(&frame.image)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for detection in &result {
    let bbox = detection.bbox;
    println!(
      "{} at ({:.0}, {:.0}, {:.0}x{:.0})",
      detection.label(),
      bbox.x,
      bbox.y,
      bbox.width,
      bbox.height
    );
  }

  output.render_result(&frame, &result, None)?;
  info!("检测到 {} 个目标", result.len());

  Ok(())
}
