// 该文件是 Jianshan （见山） 项目的一部分。
// src/model.rs - 检测结果与后处理
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

use std::borrow::Cow;

mod coco;
mod decode;
mod nms;

pub use self::coco::{COCO_CLASSES, class_name};
pub use self::decode::{DecodeConfig, DecodeError, OutputLayout, decode};
pub use self::nms::{iou, non_maximum_suppression};

/// 原图像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  /// 左上角 x
  pub x: f32,
  /// 左上角 y
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由 [x_min, y_min, x_max, y_max] 构造
  pub fn from_corners(corners: [f32; 4]) -> Self {
    Self {
      x: corners[0],
      y: corners[1],
      width: corners[2] - corners[0],
      height: corners[3] - corners[1],
    }
  }

  pub fn corners(&self) -> [f32; 4] {
    [self.x, self.y, self.x + self.width, self.y + self.height]
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }
}

/// 单个检测目标
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 类别索引
  pub class_id: usize,
  /// 置信度 [0, 1]
  pub confidence: f32,
  /// 边界框
  pub bbox: BoundingBox,
}

impl Detection {
  pub fn class_name(&self) -> Cow<'static, str> {
    class_name(self.class_id)
  }

  /// 渲染用标签，例如 `person 87.5%`
  pub fn label(&self) -> String {
    format!("{} {:.1}%", self.class_name(), self.confidence * 100.0)
  }
}

/// 一帧的检测结果，不保证顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
