// 该文件是 Jianshan （见山） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::time::Instant;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, InputError, InputSourceType},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 静态图片输入
///
/// `image:path/to/file.jpg` 只产出一帧；加上 `?repeat` 后每次都重放同一张图片，
/// 可以在没有摄像头的机器上跑完整的实时循环。
pub struct ImageFileInput {
  image: Option<RgbImage>,
  width: u32,
  height: u32,
  repeat: bool,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_file_path(url);
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    let repeat = url.query_pairs().any(|(k, _)| k == "repeat");
    debug!(
      "读取图片 {}: {}x{}, 重复: {}",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(ImageFileInput::from_image(image, repeat))
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbImage, repeat: bool) -> Self {
    let (width, height) = image.dimensions();
    Self {
      image: Some(image),
      width,
      height,
      repeat,
      frame_index: 0,
      start_time: Instant::now(),
    }
  }
}

impl FrameSource for ImageFileInput {
  fn pull(&mut self) -> Result<Option<Frame>, InputError> {
    let image = if self.repeat {
      self.image.clone()
    } else {
      self.image.take()
    };

    Ok(image.map(|image| {
      let frame = Frame::new(
        image,
        self.frame_index,
        self.start_time.elapsed().as_millis() as u64,
      );
      self.frame_index += 1;
      frame
    }))
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::Image
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_shot_yields_once() {
    let mut input = ImageFileInput::from_image(RgbImage::new(8, 4), false);
    let frame = input.pull().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 4));
    assert_eq!(frame.index, 0);
    assert_eq!(input.source_type(), InputSourceType::Image);
    assert!(input.pull().unwrap().is_none());
  }

  #[test]
  fn repeat_keeps_yielding_with_increasing_index() {
    let mut input = ImageFileInput::from_image(RgbImage::new(2, 2), true);
    for expected in 0..3 {
      assert_eq!(input.pull().unwrap().unwrap().index, expected);
    }
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:/definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
