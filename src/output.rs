// 该文件是 Jianshan （见山） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, model::DetectResult};

pub mod draw;
pub use self::draw::{Draw, DrawError, Surface};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 把一帧及其检测结果交给输出端
pub trait Render {
  type Error;

  fn render_result(
    &mut self,
    frame: &Frame,
    result: &DetectResult,
    fps: Option<f64>,
  ) -> Result<(), Self::Error>;
}

impl<R: Render + ?Sized> Render for &mut R {
  type Error = R::Error;

  fn render_result(
    &mut self,
    frame: &Frame,
    result: &DetectResult,
    fps: Option<f64>,
  ) -> Result<(), Self::Error> {
    (**self).render_result(frame, result, fps)
  }
}

impl<R: Render + ?Sized> Render for Box<R> {
  type Error = R::Error;

  fn render_result(
    &mut self,
    frame: &Frame,
    result: &DetectResult,
    fps: Option<f64>,
  ) -> Result<(), Self::Error> {
    (**self).render_result(frame, result, fps)
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 丢弃所有结果，只计数，用于测速
#[derive(Debug, Default)]
pub struct NullOutput {
  frames: u64,
}

impl NullOutput {
  pub fn frames(&self) -> u64 {
    self.frames
  }
}

impl FromUrlWithScheme for NullOutput {
  const SCHEME: &'static str = "null";
}

impl FromUrl for NullOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl Render for NullOutput {
  type Error = OutputError;

  fn render_result(
    &mut self,
    _frame: &Frame,
    _result: &DetectResult,
    _fps: Option<f64>,
  ) -> Result<(), Self::Error> {
    self.frames += 1;
    Ok(())
  }
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  NullOutput(NullOutput),
}

impl OutputWrapper {
  /// 替换绘制用的显示表面；`null` 输出不绘制
  pub fn set_surface(&mut self, surface: Surface) {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.set_surface(surface),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.set_surface(surface),
      OutputWrapper::NullOutput(_) => drop(surface),
    }
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      NullOutput::SCHEME => Ok(OutputWrapper::NullOutput(NullOutput::from_url(url)?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(
    &mut self,
    frame: &Frame,
    result: &DetectResult,
    fps: Option<f64>,
  ) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result, fps)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result, fps)
        .map_err(OutputError::from),
      OutputWrapper::NullOutput(output) => output.render_result(frame, result, fps),
    }
  }
}
