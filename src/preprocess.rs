// 该文件是 Jianshan （见山） 项目的一部分。
// src/preprocess.rs - 预处理：letterbox 缩放与 NCHW 归一化
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

use image::{Rgb, RgbImage, imageops::FilterType};

use crate::frame::{InputTensor, TensorShape};

/// 缩放后图像在画布中的放置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PadMode {
  /// 放在左上角，只在右侧和下方填充
  #[default]
  Corner,
  /// 居中，四周填充
  Center,
}

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
  /// 填充颜色
  pub pad_color: [u8; 3],
  pub pad_mode: PadMode,
  pub filter: FilterType,
}

impl Default for PreprocessConfig {
  fn default() -> Self {
    Self {
      pad_color: [0, 0, 0],
      pad_mode: PadMode::Corner,
      filter: FilterType::Triangle,
    }
  }
}

/// letterbox 变换参数，用于把模型坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  /// 原图到模型输入的缩放比例
  pub scale: f32,
  /// 水平方向填充（模型输入像素）
  pub pad_x: f32,
  /// 垂直方向填充（模型输入像素）
  pub pad_y: f32,
  /// 原图宽度
  pub frame_width: u32,
  /// 原图高度
  pub frame_height: u32,
}

impl Letterbox {
  /// 计算把 `frame` 尺寸放入 `target` 尺寸时的缩放与填充
  pub fn fit(frame: (u32, u32), target: (u32, u32), mode: PadMode) -> (Self, (u32, u32)) {
    let (frame_w, frame_h) = frame;
    let (target_w, target_h) = target;
    let scale = f32::min(
      target_w as f32 / frame_w as f32,
      target_h as f32 / frame_h as f32,
    );

    // 至少 1 像素；目标边长为 0 时也不能 panic
    let new_w = ((frame_w as f32 * scale).round() as u32).min(target_w).max(1);
    let new_h = ((frame_h as f32 * scale).round() as u32).min(target_h).max(1);

    let (pad_x, pad_y) = match mode {
      PadMode::Corner => (0, 0),
      PadMode::Center => (
        target_w.saturating_sub(new_w) / 2,
        target_h.saturating_sub(new_h) / 2,
      ),
    };

    let letterbox = Self {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
      frame_width: frame_w,
      frame_height: frame_h,
    };
    (letterbox, (new_w, new_h))
  }

  /// 模型输入坐标 -> 原图坐标
  pub fn point_to_original(&self, x: f32, y: f32) -> (f32, f32) {
    let x = ((x - self.pad_x) / self.scale).clamp(0.0, self.frame_width as f32);
    let y = ((y - self.pad_y) / self.scale).clamp(0.0, self.frame_height as f32);
    (x, y)
  }

  /// 模型输入坐标下的 [x_min, y_min, x_max, y_max] -> 原图坐标
  pub fn to_original(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (x0, y0) = self.point_to_original(bbox[0], bbox[1]);
    let (x1, y1) = self.point_to_original(bbox[2], bbox[3]);
    [x0, y0, x1, y1]
  }

  /// 原图坐标 -> 模型输入坐标
  pub fn to_model(&self, bbox: [f32; 4]) -> [f32; 4] {
    [
      bbox[0] * self.scale + self.pad_x,
      bbox[1] * self.scale + self.pad_y,
      bbox[2] * self.scale + self.pad_x,
      bbox[3] * self.scale + self.pad_y,
    ]
  }
}

/// 把一帧图像转为模型输入张量
///
/// 按比例缩放到 `shape` 的高宽内，剩余区域用 `pad_color` 填充，
/// 像素值从 [0, 255] 归一化到 [0, 1]，并从交错排布转为 NCHW 平面排布。
pub fn to_input_tensor(
  frame: &RgbImage,
  shape: TensorShape,
  config: &PreprocessConfig,
) -> (InputTensor, Letterbox) {
  let target = (shape.width as u32, shape.height as u32);
  let (letterbox, (new_w, new_h)) = Letterbox::fit(frame.dimensions(), target, config.pad_mode);

  let resized = if (new_w, new_h) == frame.dimensions() {
    frame.clone()
  } else {
    image::imageops::resize(frame, new_w, new_h, config.filter)
  };

  let mut canvas = RgbImage::from_pixel(target.0, target.1, Rgb(config.pad_color));
  image::imageops::replace(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let mut tensor = InputTensor::zeros(shape);
  let plane = shape.height * shape.width;
  let channels = shape.channels.min(3);
  let data = tensor.as_mut();
  for (x, y, pixel) in canvas.enumerate_pixels() {
    let idx = y as usize * shape.width + x as usize;
    for c in 0..channels {
      data[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }

  (tensor, letterbox)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn marker_frame(width: u32, height: u32, marker: [u32; 4]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      if x >= marker[0] && x < marker[2] && y >= marker[1] && y < marker[3] {
        Rgb([255, 255, 255])
      } else {
        Rgb([20, 40, 60])
      }
    })
  }

  #[test]
  fn tensor_has_shape_element_count_and_unit_range() {
    let shape = TensorShape::new(1, 3, 64, 64);
    for (w, h) in [(64, 64), (100, 30), (17, 91), (1, 1)] {
      let frame = RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7) as u8, (y * 13) as u8, 255]));
      let (tensor, _) = to_input_tensor(&frame, shape, &PreprocessConfig::default());
      assert_eq!(tensor.len(), shape.element_count());
      assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }
  }

  #[test]
  fn same_frame_gives_same_tensor() {
    let frame = marker_frame(320, 240, [10, 10, 50, 50]);
    let shape = TensorShape::new(1, 3, 128, 128);
    let (a, la) = to_input_tensor(&frame, shape, &PreprocessConfig::default());
    let (b, lb) = to_input_tensor(&frame, shape, &PreprocessConfig::default());
    assert_eq!(a.as_slice(), b.as_slice());
    assert_eq!(la, lb);
  }

  #[test]
  fn channels_are_planar_rgb() {
    let frame = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));
    let (tensor, _) = to_input_tensor(
      &frame,
      TensorShape::new(1, 3, 4, 4),
      &PreprocessConfig::default(),
    );
    assert_eq!(tensor.at(0, 2, 3), 1.0);
    assert_eq!(tensor.at(1, 2, 3), 0.0);
    assert!((tensor.at(2, 2, 3) - 0.2).abs() < 1e-6);
  }

  #[test]
  fn wide_frame_is_padded_below() {
    let frame = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
    let (tensor, letterbox) = to_input_tensor(
      &frame,
      TensorShape::new(1, 3, 100, 100),
      &PreprocessConfig::default(),
    );
    assert_eq!(letterbox.scale, 0.5);
    assert_eq!((letterbox.pad_x, letterbox.pad_y), (0.0, 0.0));
    // 上半部分是图像，下半部分是黑色填充
    assert!(tensor.at(0, 10, 50) > 0.99);
    assert_eq!(tensor.at(0, 75, 50), 0.0);
  }

  #[test]
  fn letterbox_round_trip_within_one_pixel() {
    let shape = TensorShape::new(1, 3, 640, 640);
    let marker = [400u32, 300, 500, 350];
    let frame = marker_frame(1280, 720, marker);

    for mode in [PadMode::Corner, PadMode::Center] {
      let config = PreprocessConfig {
        pad_mode: mode,
        ..Default::default()
      };
      let (tensor, letterbox) = to_input_tensor(&frame, shape, &config);

      // 在模型输入中找到标记区域
      let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
      for y in 0..shape.height {
        for x in 0..shape.width {
          if tensor.at(0, y, x) > 0.5 && tensor.at(2, y, x) > 0.5 {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x + 1);
            y1 = y1.max(y + 1);
          }
        }
      }

      let back = letterbox.to_original([x0 as f32, y0 as f32, x1 as f32, y1 as f32]);
      for (got, want) in back.iter().zip(marker.iter()) {
        assert!(
          (got - *want as f32).abs() <= 1.0,
          "{mode:?}: {back:?} vs {marker:?}"
        );
      }
    }
  }

  #[test]
  fn center_mode_splits_padding() {
    let (letterbox, size) = Letterbox::fit((100, 50), (100, 100), PadMode::Center);
    assert_eq!(size, (100, 50));
    assert_eq!(letterbox.pad_y, 25.0);
    let model = letterbox.to_model([10.0, 10.0, 20.0, 20.0]);
    assert_eq!(model, [10.0, 35.0, 20.0, 45.0]);
    assert_eq!(letterbox.to_original(model), [10.0, 10.0, 20.0, 20.0]);
  }

  #[test]
  fn zero_sized_target_does_not_panic() {
    for mode in [PadMode::Corner, PadMode::Center] {
      let (letterbox, size) = Letterbox::fit((1280, 720), (0, 0), mode);
      assert_eq!(size, (1, 1));
      assert_eq!((letterbox.pad_x, letterbox.pad_y), (0.0, 0.0));
    }
  }
}
