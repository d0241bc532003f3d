// 该文件是 Jianshan （见山） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use crate::model::{BoundingBox, Detection};

/// 按类别的贪心非极大值抑制
///
/// 按置信度降序遍历，与已保留的同类框 IoU 超过 `iou_threshold` 的候选被丢弃。
pub fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  // 按置信度降序排序（稳定排序）
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut result: Vec<Detection> = Vec::with_capacity(detections.len());
  for candidate in detections {
    let suppressed = result
      .iter()
      .filter(|kept| kept.class_id == candidate.class_id)
      .any(|kept| iou(&kept.bbox, &candidate.bbox) > iou_threshold);
    if !suppressed {
      result.push(candidate);
    }
  }

  result
}

/// 计算两个边界框的 IoU
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = (a.x + a.width).min(b.x + b.width);
  let y2 = (a.y + a.height).min(b.y + b.height);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
