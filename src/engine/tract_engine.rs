// 该文件是 Jianshan （见山） 项目的一部分。
// src/engine/tract_engine.rs - 基于 tract 的 ONNX 推理引擎
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

use tract_onnx::prelude::*;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{EngineBuilder, EngineError, InferenceEngine, RawOutput, RawTensor},
  frame::{InputTensor, TensorShape},
  url_file_path,
};

type TractPlan = TypedRunnableModel<TypedModel>;

pub struct TractEngine {
  plan: TractPlan,
  output_names: Vec<String>,
}

/// `onnx:model/yolov7-tiny.onnx`
pub struct TractEngineBuilder {
  model_path: String,
}

impl TractEngineBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
    }
  }

  fn load_error(&self, e: impl std::fmt::Display) -> EngineError {
    EngineError::ModelLoad {
      uri: self.model_path.clone(),
      reason: e.to_string(),
    }
  }
}

impl FromUrlWithScheme for TractEngineBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractEngineBuilder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(EngineError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(Self::new(url_file_path(url)))
  }
}

impl EngineBuilder for TractEngineBuilder {
  type Engine = TractEngine;

  fn model_uri(&self) -> String {
    self.model_path.clone()
  }

  fn build(self, shape: TensorShape) -> Result<TractEngine, EngineError> {
    info!("加载 ONNX 模型文件: {}", self.model_path);
    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(|e| self.load_error(format!("{:#}", e)))?
      .with_input_fact(0, f32::fact(shape.dims()).into())
      .map_err(|e| self.load_error(format!("{:#}", e)))?
      .into_optimized()
      .map_err(|e| self.load_error(format!("{:#}", e)))?;

    let output_names = model
      .output_outlets()
      .map_err(|e| self.load_error(format!("{:#}", e)))?
      .iter()
      .map(|outlet| model.node(outlet.node).name.clone())
      .collect::<Vec<_>>();
    debug!("模型输出: {:?}", output_names);

    let plan = model
      .into_runnable()
      .map_err(|e| self.load_error(format!("{:#}", e)))?;

    Ok(TractEngine { plan, output_names })
  }
}

impl InferenceEngine for TractEngine {
  fn run(&self, input: &InputTensor) -> Result<RawOutput, EngineError> {
    let tensor = Tensor::from_shape::<f32>(&input.shape().dims(), input.as_slice())
      .map_err(|e| EngineError::Run(format!("{:#}", e)))?;

    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| EngineError::Run(format!("{:#}", e)))?;

    let mut tensors = Vec::with_capacity(outputs.len());
    for (index, output) in outputs.iter().enumerate() {
      let output = output
        .cast_to::<f32>()
        .map_err(|e| EngineError::Run(format!("{:#}", e)))?;
      let view = output
        .to_array_view::<f32>()
        .map_err(|e| EngineError::Run(format!("{:#}", e)))?;
      let name = self
        .output_names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("output{}", index));
      tensors.push(RawTensor::new(
        name,
        view.shape().to_vec(),
        view.iter().copied().collect(),
      ));
    }

    Ok(RawOutput { tensors })
  }
}
