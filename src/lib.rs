// 该文件是 Jianshan （见山） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 实时摄像头目标检测流水线：采集 → 预处理 → 推理 → 后处理 → 渲染。

pub mod config;
pub mod engine;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod preprocess;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 取出 URL 中的文件路径（已做百分号解码）
///
/// 同时支持 `image:///abs/path.png` 与 `image:relative/path.png` 两种写法。
pub fn url_file_path(url: &url::Url) -> String {
  let path = url.path();
  match urlencoding::decode(path) {
    Ok(decoded) => decoded.into_owned(),
    Err(_) => path.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::url_file_path;
  use url::Url;

  #[test]
  fn file_path_from_absolute_and_relative_urls() {
    let url = Url::parse("image:///tmp/out%20dir/frame.png").unwrap();
    assert_eq!(url_file_path(&url), "/tmp/out dir/frame.png");

    let url = Url::parse("onnx:model/yolov7-tiny.onnx").unwrap();
    assert_eq!(url_file_path(&url), "model/yolov7-tiny.onnx");
  }
}
