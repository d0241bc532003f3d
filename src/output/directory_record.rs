// 该文件是 Jianshan （见山） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{DateTime, Datelike, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{Render, draw::Surface},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期分目录记录检测到目标的帧
///
/// `folder:/data/record` 只记录有检测结果的帧，`folder:/data/record?always` 记录每一帧。
/// 每帧写出 `YYYY/MM/DD/HH-MM-SS-XXXX.png` 以及同名的 `.json` 检测记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  /// 第一次渲染时才创建默认表面，避免重复加载字体
  surface: Option<Surface>,
  frame_counter: u16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(Self::new(url_file_path(uri), always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      surface: None,
      frame_counter: 0,
      always,
    }
  }

  pub fn set_surface(&mut self, surface: Surface) {
    self.surface = Some(surface);
  }

  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

/// 一帧检测结果的 JSON 记录
fn detections_json(frame: &Frame, result: &DetectResult, fps: Option<f64>) -> serde_json::Value {
  let detections = result
    .iter()
    .map(|d| {
      json!({
        "class_id": d.class_id,
        "class": d.class_name(),
        "confidence": d.confidence,
        "bbox": [d.bbox.x, d.bbox.y, d.bbox.width, d.bbox.height],
      })
    })
    .collect::<Vec<_>>();

  json!({
    "frame": frame.index,
    "timestamp_ms": frame.timestamp_ms,
    "width": frame.width(),
    "height": frame.height(),
    "fps": fps,
    "detections": detections,
  })
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &mut self,
    frame: &Frame,
    result: &DetectResult,
    fps: Option<f64>,
  ) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    let surface = self.surface.get_or_insert_with(Surface::default);
    surface.paint(&frame.image, result, fps).save(&path)?;

    let record = detections_json(frame, result, fps);
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;
    debug!("记录第 {} 帧: {}", frame.index, path.display());

    Ok(())
  }
}
