// 该文件是 Jianshan （见山） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use jianshan::{
  config::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MODEL_URI, DEFAULT_NMS_THRESHOLD, PipelineConfig,
  },
  frame::TensorShape,
  model::OutputLayout,
  preprocess::PadMode,
};

/// Jianshan 实时目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 onnx:model/yolov7-tiny.onnx
  #[arg(long, value_name = "MODEL", default_value = DEFAULT_MODEL_URI)]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 摄像头: v4l:///dev/video0?width=640&height=480
  /// - 图片: image:path/to/file.jpg[?repeat]
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,

  /// 输出
  /// 支持格式:
  /// - 显示表面图片: image:surface.png
  /// - 按日期记录: folder:/path/to/dir[?always]
  /// - 丢弃: null:
  #[arg(long, value_name = "OUTPUT", default_value = "image:surface.png")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 不做 NMS
  #[arg(long)]
  pub no_nms: bool,

  /// 模型输出排布
  #[arg(long, value_enum, default_value_t = OutputLayout::EndToEnd)]
  pub layout: OutputLayout,

  /// 模型输入边长
  #[arg(long, default_value_t = 640, value_parser = parse_side, value_name = "PIXELS")]
  pub input_size: usize,

  /// letterbox 填充方式
  #[arg(long, value_enum, default_value_t = PadMode::Corner)]
  pub pad_mode: PadMode,

  /// 显示表面大小
  #[arg(long, default_value = "640x640", value_parser = parse_size, value_name = "WxH")]
  pub surface: (u32, u32),

  /// 最大处理帧数，不指定则一直运行
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 标签字体文件（TTF/OTF）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 模型加载期间的调度间隔（毫秒）
  #[arg(long, default_value_t = 16, value_name = "MILLIS")]
  pub tick_ms: u64,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    let mut config = PipelineConfig {
      input_shape: TensorShape::new(1, 3, self.input_size, self.input_size),
      surface_size: self.surface,
      ..Default::default()
    }
    .with_confidence_threshold(self.confidence)
    .with_nms_threshold((!self.no_nms).then_some(self.nms_threshold))
    .with_layout(self.layout)
    .with_max_frames(self.max_frames)
    .with_font(self.font.clone())
    .with_tick_interval(Duration::from_millis(self.tick_ms));
    config.preprocess.pad_mode = self.pad_mode;
    config
  }
}

fn parse_side(s: &str) -> Result<usize, String> {
  match s.trim().parse::<usize>().map_err(|e| e.to_string())? {
    0 => Err(format!("边长不能为 0: '{}'", s)),
    side => Ok(side),
  }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
  let (w, h) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("无效的尺寸 '{}', 应为 WxH", s))?;
  let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
  let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
  if w == 0 || h == 0 {
    return Err(format!("尺寸不能为 0: '{}'", s));
  }
  Ok((w, h))
}
