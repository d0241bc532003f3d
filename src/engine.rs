// 该文件是 Jianshan （见山） 项目的一部分。
// src/engine.rs - 推理引擎与会话
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

use thiserror::Error;
use tracing::{debug, info};

use crate::frame::{InputTensor, TensorShape};

mod loader;
pub use self::loader::{LoadEvent, SessionLoader};

#[cfg(feature = "tract_engine")]
mod tract_engine;
#[cfg(feature = "tract_engine")]
pub use self::tract_engine::{TractEngine, TractEngineBuilder};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载失败 {uri}: {reason}")]
  ModelLoad { uri: String, reason: String },
  #[error("输入形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("不支持的输入形状 {0}，需要 [1, 3, H, W] 且 H、W 大于 0")]
  UnsupportedShape(TensorShape),
  #[error("推理失败: {0}")]
  Run(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型加载线程意外退出")]
  LoaderDisconnected,
}

/// 推理引擎输出的一个张量
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  pub name: String,
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl RawTensor {
  pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self {
      name: name.into(),
      shape,
      data,
    }
  }
}

/// 推理引擎的原始输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
  pub tensors: Vec<RawTensor>,
}

impl RawOutput {
  pub fn single(tensor: RawTensor) -> Self {
    Self {
      tensors: vec![tensor],
    }
  }

  pub fn first(&self) -> Option<&RawTensor> {
    self.tensors.first()
  }
}

/// 外部推理引擎
pub trait InferenceEngine {
  fn run(&self, input: &InputTensor) -> Result<RawOutput, EngineError>;
}

/// 构造推理引擎，在加载线程上调用
pub trait EngineBuilder: Send + 'static {
  type Engine: InferenceEngine + Send + 'static;

  /// 模型位置，用于日志和错误信息
  fn model_uri(&self) -> String;

  fn build(self, shape: TensorShape) -> Result<Self::Engine, EngineError>;
}

/// 已加载并完成预热的推理会话
pub struct Session<E> {
  engine: E,
  shape: TensorShape,
  model_uri: String,
}

impl<E: InferenceEngine> Session<E> {
  /// 加载模型并用全零张量预热一次
  pub fn create<B>(builder: B, shape: TensorShape) -> Result<Self, EngineError>
  where
    B: EngineBuilder<Engine = E>,
  {
    Self::create_with_progress(builder, shape, |_| {})
  }

  pub fn create_with_progress<B, P>(
    builder: B,
    shape: TensorShape,
    mut progress: P,
  ) -> Result<Self, EngineError>
  where
    B: EngineBuilder<Engine = E>,
    P: FnMut(LoadStage),
  {
    if !shape.is_rgb() || shape.element_count() == 0 {
      return Err(EngineError::UnsupportedShape(shape));
    }

    let model_uri = builder.model_uri();
    info!("加载模型: {}", model_uri);
    progress(LoadStage::Loading(model_uri.clone()));
    let engine = builder.build(shape)?;

    let session = Self {
      engine,
      shape,
      model_uri,
    };

    info!("预热模型...");
    progress(LoadStage::WarmingUp);
    session.warmup()?;
    info!("模型就绪");

    Ok(session)
  }

  fn warmup(&self) -> Result<(), EngineError> {
    let now = Instant::now();
    let zeros = InputTensor::zeros(self.shape);
    self.engine.run(&zeros).map_err(|e| EngineError::ModelLoad {
      uri: self.model_uri.clone(),
      reason: format!("预热失败: {}", e),
    })?;
    debug!("预热耗时: {:.2?}", now.elapsed());
    Ok(())
  }

  /// 运行一次推理
  pub fn run(&self, input: &InputTensor) -> Result<RawOutput, EngineError> {
    if input.shape() != self.shape {
      return Err(EngineError::ShapeMismatch {
        expected: self.shape,
        actual: input.shape(),
      });
    }
    self.engine.run(input)
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn model_uri(&self) -> &str {
    &self.model_uri
  }
}

/// 会话创建过程中的阶段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStage {
  Loading(String),
  WarmingUp,
}
