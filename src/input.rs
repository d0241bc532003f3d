// 该文件是 Jianshan （见山） 项目的一部分。
// src/input.rs - 视频/图像输入
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l2_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_camera::{V4l2Camera, V4l2CameraError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L2 camera error: {0}")]
  V4l2CameraError(#[from] V4l2CameraError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSourceType {
  /// 图片文件
  Image,
  /// V4L2 摄像头
  V4l2,
  /// 其他（测试或自定义输入）
  Other,
}

/// 帧来源：每次调用 `pull` 取出当前最新的一帧
pub trait FrameSource {
  /// 取出一帧；`Ok(None)` 表示输入已结束
  fn pull(&mut self) -> Result<Option<Frame>, InputError>;

  fn source_type(&self) -> InputSourceType {
    InputSourceType::Other
  }

  /// 帧宽度
  fn width(&self) -> u32;

  /// 帧高度
  fn height(&self) -> u32;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn pull(&mut self) -> Result<Option<Frame>, InputError> {
    (**self).pull()
  }

  fn source_type(&self) -> InputSourceType {
    (**self).source_type()
  }

  fn width(&self) -> u32 {
    (**self).width()
  }

  fn height(&self) -> u32 {
    (**self).height()
  }
}

/// 延迟打开的帧来源
///
/// 摄像头需要在模型就绪之后才申请，失败时由调用方转为摄像头访问错误。
pub trait FrameSourceFactory {
  type Source: FrameSource;

  fn open(&mut self) -> Result<Self::Source, InputError>;
}

impl<F, S> FrameSourceFactory for F
where
  F: FnMut() -> Result<S, InputError>,
  S: FrameSource,
{
  type Source = S;

  fn open(&mut self) -> Result<Self::Source, InputError> {
    self()
  }
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l2Camera(V4l2Camera),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      #[cfg(feature = "v4l_input")]
      V4l2Camera::SCHEME => Ok(InputWrapper::V4l2Camera(V4l2Camera::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl FrameSource for InputWrapper {
  fn pull(&mut self) -> Result<Option<Frame>, InputError> {
    match self {
      InputWrapper::ReadImageFile(input) => input.pull(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.pull(),
    }
  }

  fn source_type(&self) -> InputSourceType {
    match self {
      InputWrapper::ReadImageFile(input) => input.source_type(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.source_type(),
    }
  }

  fn width(&self) -> u32 {
    match self {
      InputWrapper::ReadImageFile(input) => input.width(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      InputWrapper::ReadImageFile(input) => input.height(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.height(),
    }
  }
}

/// 按 URL 打开输入源
#[derive(Debug, Clone)]
pub struct UrlSourceFactory {
  url: Url,
}

impl UrlSourceFactory {
  pub fn new(url: Url) -> Self {
    Self { url }
  }
}

impl FrameSourceFactory for UrlSourceFactory {
  type Source = InputWrapper;

  fn open(&mut self) -> Result<Self::Source, InputError> {
    InputWrapper::from_url(&self.url)
  }
}
