// 该文件是 Jianshan （见山） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头输入源
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

use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, InputError, InputSourceType},
  url_file_path,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4l2CameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("没有访问摄像头 {0} 的权限")]
  PermissionDenied(String),
  #[error("摄像头设备不存在: {0}")]
  NoDevice(String),
  #[error("V4L 错误: {0}")]
  V4lError(String),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("MJPG 解码失败: {0}")]
  DecodeError(#[from] image::ImageError),
}

impl V4l2CameraError {
  fn from_open(device_path: &str, err: std::io::Error) -> Self {
    match err.kind() {
      std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(device_path.to_string()),
      std::io::ErrorKind::NotFound => Self::NoDevice(device_path.to_string()),
      _ => Self::V4lError(format!("{}: {}", device_path, err)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
  Rgb3,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"YUYV" => Some(Self::Yuyv),
      b"MJPG" => Some(Self::Mjpg),
      b"RGB3" => Some(Self::Rgb3),
      _ => None,
    }
  }
}

/// V4L2 摄像头输入源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Camera {
  /// 捕获流（生命周期与 device 关联，必须先于 device 释放）
  stream: Option<Stream<'static>>,
  /// V4L2 设备
  _device: Pin<Box<Device>>,
  pixel_format: PixelFormat,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for V4l2Camera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4l2Camera {
  type Error = V4l2CameraError;

  /// 支持 `v4l:///dev/video0?width=1280&height=720&fourcc=MJPG`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4l2CameraError::SchemaMismatch);
    }

    let device_path = match url_file_path(url) {
      path if path.is_empty() || path == "/" => DEFAULT_DEVICE.to_string(),
      path => path,
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    let mut fourcc = *b"YUYV";
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => width = v.parse().unwrap_or(DEFAULT_WIDTH),
        "height" => height = v.parse().unwrap_or(DEFAULT_HEIGHT),
        "fourcc" if v.len() == 4 => fourcc.copy_from_slice(v.as_bytes()),
        _ => {}
      }
    }

    Self::open(&device_path, width, height, fourcc)
  }
}

impl V4l2Camera {
  /// 打开摄像头并开始采集
  pub fn open(
    device_path: &str,
    width: u32,
    height: u32,
    fourcc: [u8; 4],
  ) -> Result<Self, V4l2CameraError> {
    info!("打开摄像头: {}", device_path);
    let device = Box::pin(
      Device::with_path(device_path).map_err(|e| V4l2CameraError::from_open(device_path, e))?,
    );

    let mut format = device
      .format()
      .map_err(|e| V4l2CameraError::V4lError(e.to_string()))?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(&fourcc);
    let format = device
      .set_format(&format)
      .map_err(|e| V4l2CameraError::V4lError(e.to_string()))?;

    let pixel_format = PixelFormat::from_fourcc(format.fourcc)
      .ok_or_else(|| V4l2CameraError::UnsupportedPixelFormat(format.fourcc.to_string()))?;
    debug!(
      "摄像头格式: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 在 Drop 中先于 device 释放。
    let device_ref: &Device = &device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, CAPTURE_BUFFERS)
        .map_err(|e| V4l2CameraError::from_open(device_path, e))?
    };

    Ok(Self {
      stream: Some(stream),
      _device: device,
      pixel_format,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    })
  }

  fn decode(&self, buffer: &[u8]) -> Result<RgbImage, V4l2CameraError> {
    let image = match self.pixel_format {
      PixelFormat::Yuyv => {
        RgbImage::from_raw(self.width, self.height, yuyv_to_rgb(buffer, self.width, self.height))
      }
      PixelFormat::Rgb3 => {
        let size = (self.width * self.height * 3) as usize;
        buffer
          .get(..size)
          .and_then(|data| RgbImage::from_raw(self.width, self.height, data.to_vec()))
      }
      PixelFormat::Mjpg => Some(
        image::load_from_memory_with_format(buffer, image::ImageFormat::Jpeg)?.to_rgb8(),
      ),
    };

    image.ok_or_else(|| V4l2CameraError::V4lError("采集缓冲区大小与帧尺寸不符".to_string()))
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Drop for V4l2Camera {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl FrameSource for V4l2Camera {
  fn pull(&mut self) -> Result<Option<Frame>, InputError> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer.to_vec(),
      Err(e) => return Err(V4l2CameraError::V4lError(format!("无法捕获帧: {}", e)).into()),
    };

    let image = self.decode(&buffer)?;
    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(Some(frame))
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::V4l2
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
  fn yuyv_gray_maps_to_gray() {
    // Y=128, U=V=128 即中性灰
    let yuyv = [128u8, 128, 128, 128];
    let rgb = yuyv_to_rgb(&yuyv, 2, 1);
    assert_eq!(rgb, vec![128, 128, 128, 128, 128, 128]);
  }

  #[test]
  fn open_errors_are_classified() {
    let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
    assert!(matches!(
      V4l2CameraError::from_open("/dev/video0", denied),
      V4l2CameraError::PermissionDenied(_)
    ));
    let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
    assert!(matches!(
      V4l2CameraError::from_open("/dev/video9", missing),
      V4l2CameraError::NoDevice(_)
    ));
  }
}
