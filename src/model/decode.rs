// 该文件是 Jianshan （见山） 项目的一部分。
// src/model/decode.rs - YOLO 输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::{
  engine::{RawOutput, RawTensor},
  model::{BoundingBox, DetectResult, Detection, non_maximum_suppression},
  preprocess::Letterbox,
};

/// 模型输出张量的排布
///
/// 默认的 yolov7-tiny 模型是带 NMS 的导出，输出 `[N, 7]`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputLayout {
  /// `[1, N, 5 + C]`：cx, cy, w, h, objectness, 各类别分数（YOLOv5/v7）
  AnchorRows,
  /// `[1, 4 + C, N]`：cx, cy, w, h, 各类别分数（YOLOv8 起）
  ChannelMajor,
  /// `[N, 7]`：batch, x0, y0, x1, y1, class, score（图内已做 NMS）
  #[default]
  EndToEnd,
}

#[derive(Debug, Clone)]
pub struct DecodeConfig {
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// NMS IoU 阈值，None 表示不做 NMS
  pub nms_threshold: Option<f32>,
  pub layout: OutputLayout,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.2,
      nms_threshold: Some(0.45),
      layout: OutputLayout::default(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("模型没有输出")]
  MissingOutput,
  #[error("{layout:?} 排布不支持形状 {shape:?}")]
  UnexpectedShape {
    layout: OutputLayout,
    shape: Vec<usize>,
  },
}

/// 候选框，模型输入坐标下的 [x_min, y_min, x_max, y_max]
struct Candidate {
  class_id: usize,
  confidence: f32,
  corners: [f32; 4],
}

/// 把原始输出解码为检测结果
///
/// 低于阈值的候选被丢弃，保留的框通过 `letterbox` 映射回原图坐标。
pub fn decode(
  raw: &RawOutput,
  letterbox: &Letterbox,
  config: &DecodeConfig,
) -> Result<DetectResult, DecodeError> {
  let tensor = raw.first().ok_or(DecodeError::MissingOutput)?;
  let threshold = config.confidence_threshold;

  let candidates = match config.layout {
    OutputLayout::AnchorRows => anchor_rows(tensor, threshold)?,
    OutputLayout::ChannelMajor => channel_major(tensor, threshold)?,
    OutputLayout::EndToEnd => end_to_end(tensor, threshold)?,
  };
  let num_candidates = candidates.len();

  let detections: Vec<Detection> = candidates
    .into_iter()
    .filter_map(|candidate| {
      let bbox = BoundingBox::from_corners(letterbox.to_original(candidate.corners));
      (bbox.width > 0.0 && bbox.height > 0.0).then_some(Detection {
        class_id: candidate.class_id,
        confidence: candidate.confidence,
        bbox,
      })
    })
    .collect();

  let detections = match (config.layout, config.nms_threshold) {
    (OutputLayout::EndToEnd, _) | (_, None) => detections,
    (_, Some(iou_threshold)) => non_maximum_suppression(detections, iou_threshold),
  };

  debug!(
    "解码: {} 个候选超过阈值 {}, 保留 {} 个",
    num_candidates,
    threshold,
    detections.len()
  );

  Ok(detections.into())
}

/// 稠密排布必须带 batch 维 `[1, rows, cols]`
fn batched(tensor: &RawTensor) -> Option<(usize, usize)> {
  match tensor.shape.as_slice() {
    [1, rows, cols] => Some((*rows, *cols)),
    _ => None,
  }
}

/// 端到端排布只接受 `[rows, cols]`
fn unbatched(tensor: &RawTensor) -> Option<(usize, usize)> {
  match tensor.shape.as_slice() {
    [rows, cols] => Some((*rows, *cols)),
    _ => None,
  }
}

fn unexpected(layout: OutputLayout, tensor: &RawTensor) -> DecodeError {
  DecodeError::UnexpectedShape {
    layout,
    shape: tensor.shape.clone(),
  }
}

/// 找到分数最高的类别
fn best_class(scores: impl Iterator<Item = f32>) -> (usize, f32) {
  scores
    .enumerate()
    .fold((0, f32::MIN), |best, (class_id, score)| {
      if score > best.1 { (class_id, score) } else { best }
    })
}

fn center_to_corners(cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
  [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// 置信度不低于阈值才保留，NaN 一律丢弃
fn passes(confidence: f32, threshold: f32) -> bool {
  confidence >= threshold
}

fn anchor_rows(tensor: &RawTensor, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
  let layout = OutputLayout::AnchorRows;
  let (rows, cols) = batched(tensor).ok_or_else(|| unexpected(layout, tensor))?;
  if cols < 6 || tensor.data.len() != rows * cols {
    return Err(unexpected(layout, tensor));
  }

  let mut candidates = Vec::new();
  for row in tensor.data.chunks_exact(cols) {
    let objectness = row[4];
    if !passes(objectness, threshold) {
      continue;
    }

    let (class_id, class_score) = best_class(row[5..].iter().copied());
    let confidence = objectness * class_score;
    if !passes(confidence, threshold) {
      continue;
    }

    candidates.push(Candidate {
      class_id,
      confidence,
      corners: center_to_corners(row[0], row[1], row[2], row[3]),
    });
  }

  Ok(candidates)
}

fn channel_major(tensor: &RawTensor, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
  let layout = OutputLayout::ChannelMajor;
  let (channels, anchors) = batched(tensor).ok_or_else(|| unexpected(layout, tensor))?;
  if channels < 5 || tensor.data.len() != channels * anchors {
    return Err(unexpected(layout, tensor));
  }

  let data = &tensor.data;
  let at = |c: usize, i: usize| data[c * anchors + i];

  let mut candidates = Vec::new();
  for i in 0..anchors {
    let (class_id, confidence) = best_class((4..channels).map(|c| at(c, i)));
    if !passes(confidence, threshold) {
      continue;
    }

    candidates.push(Candidate {
      class_id,
      confidence,
      corners: center_to_corners(at(0, i), at(1, i), at(2, i), at(3, i)),
    });
  }

  Ok(candidates)
}

fn end_to_end(tensor: &RawTensor, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
  let layout = OutputLayout::EndToEnd;
  let (rows, cols) = unbatched(tensor).ok_or_else(|| unexpected(layout, tensor))?;
  if cols != 7 || tensor.data.len() != rows * cols {
    return Err(unexpected(layout, tensor));
  }

  let candidates = tensor
    .data
    .chunks_exact(cols)
    .filter(|row| passes(row[6], threshold) && row[5] >= 0.0)
    .map(|row| Candidate {
      class_id: row[5] as usize,
      confidence: row[6],
      corners: [row[1], row[2], row[3], row[4]],
    })
    .collect();

  Ok(candidates)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preprocess::{Letterbox, PadMode};

  const NUM_CLASSES: usize = 3;

  fn identity() -> Letterbox {
    Letterbox::fit((640, 640), (640, 640), PadMode::Corner).0
  }

  fn anchor_row(cx: f32, cy: f32, w: f32, h: f32, obj: f32, class_id: usize, score: f32) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, obj];
    row.extend((0..NUM_CLASSES).map(|c| if c == class_id { score } else { 0.01 }));
    row
  }

  fn anchor_config() -> DecodeConfig {
    DecodeConfig {
      layout: OutputLayout::AnchorRows,
      ..Default::default()
    }
  }

  fn anchor_output(rows: Vec<Vec<f32>>) -> RawOutput {
    let n = rows.len();
    RawOutput::single(RawTensor::new(
      "output",
      vec![1, n, 5 + NUM_CLASSES],
      rows.concat(),
    ))
  }

  /// 确定性的伪随机候选，覆盖各种置信度
  fn pseudo_random_output(n: usize) -> RawOutput {
    let mut state = 0x2545_f491_u32;
    let mut next = || {
      state ^= state << 13;
      state ^= state >> 17;
      state ^= state << 5;
      (state % 10_000) as f32 / 10_000.0
    };
    let rows = (0..n)
      .map(|_| {
        let cx = next() * 640.0;
        let cy = next() * 640.0;
        let w = 10.0 + next() * 100.0;
        let h = 10.0 + next() * 100.0;
        let obj = next();
        let class_id = (next() * NUM_CLASSES as f32) as usize % NUM_CLASSES;
        anchor_row(cx, cy, w, h, obj, class_id, next())
      })
      .collect();
    anchor_output(rows)
  }

  #[test]
  fn anchor_rows_multiply_objectness_and_class_score() {
    let raw = anchor_output(vec![
      anchor_row(100.0, 100.0, 40.0, 20.0, 0.9, 1, 0.8),
      anchor_row(300.0, 300.0, 40.0, 20.0, 0.3, 2, 0.5),
    ]);
    let result = decode(&raw, &identity(), &anchor_config()).unwrap();
    assert_eq!(result.len(), 1);
    let detection = &result.items[0];
    assert_eq!(detection.class_id, 1);
    assert!((detection.confidence - 0.72).abs() < 1e-6);
    assert_eq!(detection.bbox, BoundingBox::new(80.0, 90.0, 40.0, 20.0));
  }

  #[test]
  fn never_returns_below_threshold() {
    let raw = pseudo_random_output(500);
    for threshold in [0.0, 0.05, 0.2, 0.5, 0.9] {
      let config = DecodeConfig {
        confidence_threshold: threshold,
        ..anchor_config()
      };
      let result = decode(&raw, &identity(), &config).unwrap();
      assert!(result.iter().all(|d| d.confidence >= threshold));
    }
  }

  #[test]
  fn raising_threshold_only_shrinks_result() {
    let raw = pseudo_random_output(500);
    for nms_threshold in [None, Some(0.45)] {
      let mut previous: Option<DetectResult> = None;
      for threshold in [0.05, 0.1, 0.2, 0.3, 0.5, 0.7] {
        let config = DecodeConfig {
          confidence_threshold: threshold,
          nms_threshold,
          ..anchor_config()
        };
        let result = decode(&raw, &identity(), &config).unwrap();
        if let Some(previous) = &previous {
          assert!(result.len() <= previous.len());
          assert!(result.iter().all(|d| previous.items.contains(d)));
        }
        previous = Some(result);
      }
    }
  }

  #[test]
  fn boxes_are_mapped_back_to_frame() {
    // 1280x720 的帧缩放到 640x640，比例 0.5
    let (letterbox, _) = Letterbox::fit((1280, 720), (640, 640), PadMode::Center);
    let raw = anchor_output(vec![anchor_row(250.0, 300.0, 50.0, 40.0, 1.0, 0, 1.0)]);
    let result = decode(&raw, &letterbox, &anchor_config()).unwrap();
    let bbox = result.items[0].bbox;
    // pad_y = (640 - 360) / 2 = 140
    assert_eq!(bbox, BoundingBox::new(450.0, 280.0, 100.0, 80.0));
  }

  #[test]
  fn boxes_entirely_in_padding_are_dropped() {
    let (letterbox, _) = Letterbox::fit((1280, 720), (640, 640), PadMode::Corner);
    // 内容区域只有 y < 360
    let raw = anchor_output(vec![anchor_row(300.0, 600.0, 50.0, 40.0, 1.0, 0, 1.0)]);
    let result = decode(&raw, &letterbox, &anchor_config()).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn overlapping_boxes_are_suppressed() {
    let raw = anchor_output(vec![
      anchor_row(100.0, 100.0, 40.0, 40.0, 0.9, 0, 0.9),
      anchor_row(102.0, 101.0, 40.0, 40.0, 0.8, 0, 0.9),
    ]);
    let with_nms = decode(&raw, &identity(), &anchor_config()).unwrap();
    assert_eq!(with_nms.len(), 1);

    let config = DecodeConfig {
      nms_threshold: None,
      ..anchor_config()
    };
    assert_eq!(decode(&raw, &identity(), &config).unwrap().len(), 2);
  }

  #[test]
  fn channel_major_layout() {
    // 4 + 2 个通道，3 个锚点
    let anchors = 3;
    #[rustfmt::skip]
    let data = vec![
      100.0, 200.0, 300.0, // cx
      100.0, 200.0, 300.0, // cy
      20.0, 20.0, 20.0,    // w
      20.0, 20.0, 20.0,    // h
      0.1, 0.7, 0.05,      // class 0
      0.6, 0.1, 0.05,      // class 1
    ];
    let raw = RawOutput::single(RawTensor::new("output0", vec![1, 6, anchors], data));
    let config = DecodeConfig {
      layout: OutputLayout::ChannelMajor,
      ..Default::default()
    };
    let mut result = decode(&raw, &identity(), &config).unwrap().items.into_vec();
    result.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
    assert_eq!(result.len(), 2);
    assert_eq!((result[0].class_id, result[0].confidence), (1, 0.6));
    assert_eq!((result[1].class_id, result[1].confidence), (0, 0.7));
  }

  #[test]
  fn end_to_end_layout_uses_corners_and_skips_nms() {
    #[rustfmt::skip]
    let data = vec![
      0.0, 10.0, 10.0, 50.0, 50.0, 16.0, 0.9,
      0.0, 11.0, 11.0, 51.0, 51.0, 16.0, 0.8,
      0.0, 10.0, 10.0, 50.0, 50.0, 0.0, 0.1,
    ];
    let raw = RawOutput::single(RawTensor::new("output", vec![3, 7], data));
    let result = decode(&raw, &identity(), &DecodeConfig::default()).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].class_name(), "dog");
    assert_eq!(result.items[0].bbox, BoundingBox::new(10.0, 10.0, 40.0, 40.0));
  }

  #[test]
  fn wrong_shapes_are_reported() {
    let raw = RawOutput::single(RawTensor::new("output", vec![1, 2, 3, 4], vec![0.0; 24]));
    assert!(matches!(
      decode(&raw, &identity(), &DecodeConfig::default()),
      Err(DecodeError::UnexpectedShape { .. })
    ));
    assert!(matches!(
      decode(&RawOutput::default(), &identity(), &DecodeConfig::default()),
      Err(DecodeError::MissingOutput)
    ));
  }

  #[test]
  fn default_layout_reads_end_to_end_rows() {
    let row = vec![0.0, 100.0, 120.0, 200.0, 220.0, 0.0, 0.9];
    let raw = RawOutput::single(RawTensor::new("output", vec![1, 7], row));
    let result = decode(&raw, &identity(), &DecodeConfig::default()).unwrap();
    assert_eq!(result.len(), 1);
    let detection = &result.items[0];
    assert_eq!(detection.class_name(), "person");
    assert_eq!(detection.confidence, 0.9);
    assert_eq!(detection.bbox, BoundingBox::new(100.0, 120.0, 100.0, 100.0));
  }

  #[test]
  fn dense_layouts_reject_unbatched_rows() {
    let row = vec![0.0, 100.0, 120.0, 200.0, 220.0, 0.0, 0.9];
    let raw = RawOutput::single(RawTensor::new("output", vec![1, 7], row));
    for layout in [OutputLayout::AnchorRows, OutputLayout::ChannelMajor] {
      let config = DecodeConfig {
        layout,
        ..Default::default()
      };
      assert!(matches!(
        decode(&raw, &identity(), &config),
        Err(DecodeError::UnexpectedShape { .. })
      ));
    }

    // 带 batch 维的端到端输出也不接受
    let raw = RawOutput::single(RawTensor::new("output", vec![1, 1, 7], vec![0.5; 7]));
    assert!(matches!(
      decode(&raw, &identity(), &DecodeConfig::default()),
      Err(DecodeError::UnexpectedShape { .. })
    ));
  }

  #[test]
  fn confidences_stay_in_unit_range() {
    let raw = pseudo_random_output(500);
    for nms_threshold in [None, Some(0.45)] {
      let config = DecodeConfig {
        confidence_threshold: 0.0,
        nms_threshold,
        ..anchor_config()
      };
      let result = decode(&raw, &identity(), &config).unwrap();
      assert!(!result.is_empty());
      assert!(result.iter().all(|d| (0.0..=1.0).contains(&d.confidence)));
    }

    #[rustfmt::skip]
    let data = vec![
      0.0, 10.0, 10.0, 50.0, 50.0, 2.0, 0.35,
      0.0, 60.0, 60.0, 90.0, 90.0, 5.0, 1.0,
    ];
    let raw = RawOutput::single(RawTensor::new("output", vec![2, 7], data));
    let result = decode(&raw, &identity(), &DecodeConfig::default()).unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.iter().all(|d| (0.0..=1.0).contains(&d.confidence)));
  }
}
