// 该文件是 Jianshan （见山） 项目的一部分。
// src/frame.rs - 帧与 NCHW 张量定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 一帧已解码的 RGB 图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒，从输入源打开时开始计）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// NCHW 张量形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub batch: usize,
  pub channels: usize,
  pub height: usize,
  pub width: usize,
}

impl TensorShape {
  pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
    Self {
      batch,
      channels,
      height,
      width,
    }
  }

  pub fn dims(&self) -> [usize; 4] {
    [self.batch, self.channels, self.height, self.width]
  }

  pub fn element_count(&self) -> usize {
    self.batch * self.channels * self.height * self.width
  }

  pub fn is_rgb(&self) -> bool {
    self.batch == 1 && self.channels == RGB_CHANNELS
  }
}

impl std::fmt::Display for TensorShape {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "[{}, {}, {}, {}]",
      self.batch, self.channels, self.height, self.width
    )
  }
}

/// 模型输入张量，NCHW 排布的 f32 数据
#[derive(Debug, Clone)]
pub struct InputTensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl InputTensor {
  /// 全零张量，用于预热
  pub fn zeros(shape: TensorShape) -> Self {
    Self {
      shape,
      data: vec![0.0f32; shape.element_count()].into_boxed_slice(),
    }
  }

  /// 从原始数据构造，长度必须与形状一致
  pub fn from_vec(shape: TensorShape, data: Vec<f32>) -> Option<Self> {
    if data.len() != shape.element_count() {
      return None;
    }
    Some(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 取 (c, y, x) 处的值，batch 固定为 0
  pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
    let plane = self.shape.height * self.shape.width;
    self.data[c * plane + y * self.shape.width + x]
  }
}

impl AsMut<[f32]> for InputTensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}
