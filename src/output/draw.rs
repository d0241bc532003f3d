// 该文件是 Jianshan （见山） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::DEFAULT_SURFACE_SIZE,
  model::{DetectResult, Detection},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 没有字体时按字符数估算宽度
const LABEL_TEXT_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const STATUS_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PALETTE_SIZE: usize = 80;

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONTS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 把帧和检测结果画到显示表面上
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  label_text_height: u32,
  label_char_width: f32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    // 每个 COCO 类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb(i as f32 / PALETTE_SIZE as f32 * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      colors,
    }
  }

  /// 加载字体：指定路径时必须成功，否则在系统字体中查找，找不到就只画框
  pub fn load(font: Option<&Path>) -> Result<Self, DrawError> {
    match font {
      Some(path) => Ok(Self::new(Some(load_font(path)?))),
      None => Ok(Self::with_system_font()),
    }
  }

  pub fn with_system_font() -> Self {
    let font = SYSTEM_FONTS.iter().find_map(|path| {
      let path = Path::new(path);
      if !path.exists() {
        return None;
      }
      match load_font(path) {
        Ok(font) => {
          info!("使用系统字体: {}", path.display());
          Some(font)
        }
        Err(e) => {
          warn!("跳过字体 {}: {}", path.display(), e);
          None
        }
      }
    });

    if font.is_none() {
      warn!("没有可用的字体，只绘制边框，不绘制文字");
    }
    Self::new(font)
  }

  /// 类别对应的颜色
  pub fn color_of(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }

  /// 绘制一帧
  ///
  /// 先把 `frame` 缩放铺满 `surface` 作为背景，再画每个检测框与标签，最后在左上角写 FPS。
  pub fn render(
    &self,
    surface: &mut RgbImage,
    frame: &RgbImage,
    result: &DetectResult,
    fps: Option<f64>,
  ) {
    let (surface_w, surface_h) = surface.dimensions();
    if surface_w == 0 || surface_h == 0 || frame.width() == 0 || frame.height() == 0 {
      return;
    }

    if frame.dimensions() == surface.dimensions() {
      surface.copy_from_slice(frame.as_raw());
    } else {
      let background = image::imageops::resize(frame, surface_w, surface_h, FilterType::Triangle);
      surface.copy_from_slice(background.as_raw());
    }

    let scale_x = surface_w as f32 / frame.width() as f32;
    let scale_y = surface_h as f32 / frame.height() as f32;
    for detection in result {
      self.draw_detection(surface, detection, scale_x, scale_y);
    }

    if let Some(fps) = fps {
      self.draw_status(surface, &format!("{:.2} FPS", fps));
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection, scale_x: f32, scale_y: f32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = self.color_of(detection.class_id);
    let [x0, y0, x1, y1] = detection.bbox.corners();

    let x_min = ((x0 * scale_x).floor() as i32).clamp(0, w - 1);
    let y_min = ((y0 * scale_y).floor() as i32).clamp(0, h - 1);
    let x_max = ((x1 * scale_x).ceil() as i32).clamp(0, w - 1);
    let y_max = ((y1 * scale_y).ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框加粗为 2 像素
    let (box_w, box_h) = ((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32);
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(box_w, box_h), color);
    if box_w > 2 && box_h > 2 {
      let inner = Rect::at(x_min + 1, y_min + 1).of_size(box_w - 2, box_h - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    // 标签放在框的上方，贴边时放进框内
    let label = detection.label();
    let label_h = self.label_text_height as i32;
    let label_y = if y_min >= label_h {
      y_min - label_h
    } else {
      y_min
    };
    let label_w = self.text_width(&label).min((w - x_min) as u32);
    if label_w == 0 {
      return;
    }

    let strip = Rect::at(x_min, label_y).of_size(label_w, self.label_text_height);
    draw_filled_rect_mut(image, strip, color);
    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        x_min + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        self.font_scale,
        font,
        &label,
      );
    }
  }

  /// 左上角状态区
  fn draw_status(&self, image: &mut RgbImage, text: &str) {
    let Some(font) = &self.font else {
      return;
    };

    let width = self.text_width(text).min(image.width());
    if width == 0 {
      return;
    }
    let height = self.label_text_height.min(image.height());
    draw_filled_rect_mut(image, Rect::at(0, 0).of_size(width, height), STATUS_COLOR);
    draw_text_mut(
      image,
      TEXT_COLOR,
      LABEL_TEXT_PADDING,
      LABEL_TEXT_PADDING,
      self.font_scale,
      font,
      text,
    );
  }

  fn text_width(&self, text: &str) -> u32 {
    let padding = 2 * LABEL_TEXT_PADDING as u32;
    match &self.font {
      Some(font) => text_size(self.font_scale, font, text).0 + padding,
      None => (text.chars().count() as f32 * self.label_char_width) as u32 + padding,
    }
  }
}

/// 显示表面：复用同一块画布逐帧绘制
pub struct Surface {
  draw: Draw,
  image: RgbImage,
}

impl Default for Surface {
  fn default() -> Self {
    Self::new(Draw::with_system_font(), DEFAULT_SURFACE_SIZE)
  }
}

impl Surface {
  pub fn new(draw: Draw, (width, height): (u32, u32)) -> Self {
    Self {
      draw,
      image: RgbImage::new(width, height),
    }
  }

  pub fn paint(&mut self, frame: &RgbImage, result: &DetectResult, fps: Option<f64>) -> &RgbImage {
    self.draw.render(&mut self.image, frame, result, fps);
    &self.image
  }
}

fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path)?;
  FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(format!("{}: {}", path.display(), e)))
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h {
    h if h < 60.0 => (c, x, 0.0),
    h if h < 120.0 => (x, c, 0.0),
    h if h < 180.0 => (0.0, c, x),
    h if h < 240.0 => (0.0, x, c),
    h if h < 300.0 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
