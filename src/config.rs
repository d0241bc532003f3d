// 该文件是 Jianshan （见山） 项目的一部分。
// src/config.rs - 流水线配置
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
use std::time::Duration;

use crate::{
  frame::TensorShape,
  model::{DecodeConfig, OutputLayout},
  preprocess::PreprocessConfig,
};

/// 默认模型路径（相对于工作目录）
pub const DEFAULT_MODEL_URI: &str = "onnx:model/yolov7-tiny.onnx";
/// 模型输入形状 [1, 3, 640, 640]
pub const DEFAULT_INPUT_SHAPE: TensorShape = TensorShape::new(1, 3, 640, 640);
/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.2;
/// 默认 NMS IoU 阈值
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
/// 显示表面大小，与模型输入一致
pub const DEFAULT_SURFACE_SIZE: (u32, u32) = (640, 640);
/// 约 60 Hz 的调度间隔
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// 整条流水线的配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 模型输入形状
  pub input_shape: TensorShape,
  /// 预处理参数
  pub preprocess: PreprocessConfig,
  /// 后处理参数
  pub decode: DecodeConfig,
  /// 渲染表面大小 (宽, 高)
  pub surface_size: (u32, u32),
  /// 会话未就绪时的空转间隔
  pub tick_interval: Duration,
  /// 最大处理帧数，None 表示不限
  pub max_frames: Option<u64>,
  /// 标签字体文件
  pub font: Option<PathBuf>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      input_shape: DEFAULT_INPUT_SHAPE,
      preprocess: PreprocessConfig::default(),
      decode: DecodeConfig {
        confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        nms_threshold: Some(DEFAULT_NMS_THRESHOLD),
        layout: OutputLayout::default(),
      },
      surface_size: DEFAULT_SURFACE_SIZE,
      tick_interval: DEFAULT_TICK_INTERVAL,
      max_frames: None,
      font: None,
    }
  }
}

impl PipelineConfig {
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.decode.confidence_threshold = threshold;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: Option<f32>) -> Self {
    self.decode.nms_threshold = threshold;
    self
  }

  pub fn with_layout(mut self, layout: OutputLayout) -> Self {
    self.decode.layout = layout;
    self
  }

  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_font(mut self, font: Option<PathBuf>) -> Self {
    self.font = font;
    self
  }

  pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
    self.tick_interval = tick_interval;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_demo_constants() {
    let config = PipelineConfig::default();
    assert_eq!(config.input_shape.dims(), [1, 3, 640, 640]);
    assert_eq!(config.decode.confidence_threshold, 0.2);
    // 默认模型是带 NMS 的端到端导出
    assert_eq!(config.decode.layout, OutputLayout::EndToEnd);
    assert_eq!(config.surface_size, (640, 640));
    assert!(config.max_frames.is_none());
  }
}
