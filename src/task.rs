// 该文件是 Jianshan （见山） 项目的一部分。
// src/task.rs - 检测流水线与主循环
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  engine::{EngineBuilder, EngineError, InferenceEngine, LoadEvent, Session, SessionLoader},
  input::{FrameSource, FrameSourceFactory, InputError, InputSourceType},
  model::{DecodeConfig, DecodeError, DetectResult, decode},
  output::Render,
  preprocess::{PreprocessConfig, to_input_tensor},
};

/// 每隔多少帧在 info 级别输出一次 FPS
const FPS_LOG_INTERVAL: u64 = 30;

/// 单帧推理失败，不终止循环
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理失败: {0}")]
  Engine(#[from] EngineError),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型加载失败: {0}")]
  ModelLoad(#[source] EngineError),
  #[error("无法访问摄像头: {0}")]
  CameraAccess(#[source] InputError),
  #[error("{0}")]
  Inference(#[from] InferenceError),
  #[error("输出失败: {0}")]
  Output(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PipelineError {
  pub fn kind(&self) -> FailureKind {
    match self {
      PipelineError::ModelLoad(_) => FailureKind::ModelLoad,
      PipelineError::CameraAccess(_) => FailureKind::CameraAccess,
      PipelineError::Inference(_) => FailureKind::Inference,
      PipelineError::Output(_) => FailureKind::Output,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  ModelLoad,
  CameraAccess,
  Inference,
  Output,
}

impl FailureKind {
  /// 进程退出码，每类失败各不相同
  pub fn exit_code(self) -> u8 {
    match self {
      FailureKind::ModelLoad => 2,
      FailureKind::CameraAccess => 3,
      FailureKind::Inference => 4,
      FailureKind::Output => 5,
    }
  }
}

/// 流水线状态
///
/// `Idle → LoadingEngine → WarmingUp → CameraPermissionPending → Ready ⇄ Detecting`，
/// 加载或打开摄像头失败时进入终止状态 `Failed`，不重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  LoadingEngine,
  WarmingUp,
  CameraPermissionPending,
  Ready,
  Detecting,
  Failed(FailureKind),
}

impl std::fmt::Display for PipelineState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PipelineState::Idle => f.write_str("空闲"),
      PipelineState::LoadingEngine => f.write_str("正在加载模型"),
      PipelineState::WarmingUp => f.write_str("正在预热模型"),
      PipelineState::CameraPermissionPending => f.write_str("等待摄像头"),
      PipelineState::Ready => f.write_str("就绪"),
      PipelineState::Detecting => f.write_str("检测中"),
      PipelineState::Failed(kind) => write!(f, "失败 ({:?})", kind),
    }
  }
}

/// 面向用户的状态与告警
pub trait Notifier {
  /// 状态变化，用于状态栏显示
  fn state_changed(&mut self, state: PipelineState);

  /// 阻塞式告警，流水线进入 `Failed` 时调用一次
  fn alert(&mut self, error: &PipelineError);
}

impl<N: Notifier + ?Sized> Notifier for &mut N {
  fn state_changed(&mut self, state: PipelineState) {
    (**self).state_changed(state)
  }

  fn alert(&mut self, error: &PipelineError) {
    (**self).alert(error)
  }
}

/// 日志加标准错误输出
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn state_changed(&mut self, state: PipelineState) {
    match state {
      // 每帧都会切换一次
      PipelineState::Ready | PipelineState::Detecting => debug!("状态: {}", state),
      _ => info!("状态: {}", state),
    }
  }

  fn alert(&mut self, error: &PipelineError) {
    error!("{}", error);
    eprintln!("错误: {}", error);
  }
}

/// 循环计时状态
#[derive(Debug, Default)]
pub struct LoopState {
  last_tick: Option<Instant>,
  fps: Option<f64>,
}

impl LoopState {
  pub fn new() -> Self {
    Self::default()
  }

  /// 记录一次调度；第一次没有 FPS，之后为 `1000 / Δt_ms`
  pub fn record_tick(&mut self, now: Instant) -> Option<f64> {
    if let Some(last) = self.last_tick {
      let delta_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
      if delta_ms > 0.0 {
        self.fps = Some(1000.0 / delta_ms);
      }
    }
    self.last_tick = Some(now);
    self.fps
  }

  pub fn fps(&self) -> Option<f64> {
    self.fps
  }
}

/// 单帧检测：预处理 → 推理 → 解码
pub struct DetectionPipeline<E> {
  session: Session<E>,
  preprocess: PreprocessConfig,
  decode: DecodeConfig,
}

impl<E: InferenceEngine> DetectionPipeline<E> {
  pub fn new(session: Session<E>, config: &PipelineConfig) -> Self {
    Self {
      session,
      preprocess: config.preprocess.clone(),
      decode: config.decode.clone(),
    }
  }

  pub fn detect(&self, image: &RgbImage) -> Result<DetectResult, InferenceError> {
    let now = Instant::now();
    let (tensor, letterbox) = to_input_tensor(image, self.session.shape(), &self.preprocess);
    let preprocessed = now.elapsed();

    let raw = self.session.run(&tensor)?;
    let inferred = now.elapsed();

    let result = decode(&raw, &letterbox, &self.decode)?;
    debug!(
      "预处理 {:.2?}, 推理 {:.2?}, 解码 {:.2?}, {} 个目标",
      preprocessed,
      inferred - preprocessed,
      now.elapsed() - inferred,
      result.len()
    );

    Ok(result)
  }
}

/// 主循环结束时的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopSummary {
  /// 处理的帧数
  pub frames: u64,
  /// 检测到的目标总数
  pub detections: usize,
  /// 推理失败的帧数
  pub inference_errors: u64,
  /// 最后的 FPS 估计
  pub last_fps: Option<f64>,
}

/// 驱动整条流水线的主循环
pub struct LoopController<F, B, O, N> {
  config: PipelineConfig,
  source_factory: F,
  engine_builder: Option<B>,
  output: O,
  notifier: N,
  state: PipelineState,
  stop: Arc<AtomicBool>,
}

impl<F, B, O, N> LoopController<F, B, O, N>
where
  F: FrameSourceFactory,
  B: EngineBuilder,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
  N: Notifier,
{
  pub fn new(config: PipelineConfig, source_factory: F, engine_builder: B, output: O, notifier: N) -> Self {
    Self {
      config,
      source_factory,
      engine_builder: Some(engine_builder),
      output,
      notifier,
      state: PipelineState::Idle,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  /// 置为 true 后主循环在下一次调度时退出
  pub fn stop_handle(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  /// 收到 Ctrl-C 时停止主循环
  pub fn stop_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let stop = self.stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.store(true, Ordering::SeqCst);
    })
  }

  fn transition(&mut self, state: PipelineState) {
    if self.state != state {
      debug!("状态变化: {} -> {}", self.state, state);
      self.state = state;
      self.notifier.state_changed(state);
    }
  }

  fn fail(&mut self, error: PipelineError) -> PipelineError {
    self.transition(PipelineState::Failed(error.kind()));
    self.notifier.alert(&error);
    error
  }

  fn stopped(&self) -> bool {
    self.stop.load(Ordering::SeqCst)
  }

  /// 运行流水线直到输入结束、达到帧数上限或收到停止信号
  pub fn start(mut self) -> Result<LoopSummary, PipelineError> {
    if let Some(builder) = &self.engine_builder {
      info!("模型: {}", builder.model_uri());
    }
    info!("输入形状: {}", self.config.input_shape);

    let Some(session) = self.load_session()? else {
      warn!("会话就绪前收到停止信号");
      return Ok(LoopSummary::default());
    };

    self.transition(PipelineState::CameraPermissionPending);
    let mut source = match self.source_factory.open() {
      Ok(source) => source,
      Err(e) => return Err(self.fail(PipelineError::CameraAccess(e))),
    };
    let (width, height) = (source.width(), source.height());
    match source.source_type() {
      InputSourceType::V4l2 => info!("摄像头已打开: {}x{}", width, height),
      InputSourceType::Image => info!("使用图片输入: {}x{}", width, height),
      InputSourceType::Other => info!("输入源已打开: {}x{}", width, height),
    }

    let pipeline = DetectionPipeline::new(session, &self.config);
    self.transition(PipelineState::Ready);
    self.run_loop(&pipeline, &mut source)
  }

  /// 在后台线程加载会话，未就绪时按调度间隔空转
  fn load_session(&mut self) -> Result<Option<Session<B::Engine>>, PipelineError> {
    self.transition(PipelineState::LoadingEngine);

    // 构造器只使用一次
    let Some(builder) = self.engine_builder.take() else {
      return Err(self.fail(PipelineError::ModelLoad(EngineError::LoaderDisconnected)));
    };
    let mut loader = SessionLoader::spawn(builder, self.config.input_shape);

    loop {
      match loader.poll(self.config.tick_interval) {
        None => {
          if self.stopped() {
            return Ok(None);
          }
        }
        Some(LoadEvent::Loading(uri)) => info!("正在加载模型: {}", uri),
        Some(LoadEvent::WarmingUp) => self.transition(PipelineState::WarmingUp),
        Some(LoadEvent::Ready(session)) => return Ok(Some(session)),
        Some(LoadEvent::Failed(e)) => return Err(self.fail(PipelineError::ModelLoad(e))),
      }
    }
  }

  fn run_loop<E: InferenceEngine>(
    &mut self,
    pipeline: &DetectionPipeline<E>,
    source: &mut F::Source,
  ) -> Result<LoopSummary, PipelineError> {
    let mut loop_state = LoopState::new();
    let mut summary = LoopSummary::default();

    while !self.stopped() {
      if self.config.max_frames.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出主循环", summary.frames);
        break;
      }

      let frame = match source.pull() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          info!("输入结束");
          break;
        }
        Err(e) => return Err(self.fail(PipelineError::CameraAccess(e))),
      };

      self.transition(PipelineState::Detecting);
      let fps = loop_state.record_tick(Instant::now());

      let result = match pipeline.detect(&frame.image) {
        Ok(result) => result,
        Err(e) => {
          error!("第 {} 帧: {}", frame.index, e);
          summary.inference_errors += 1;
          DetectResult::empty()
        }
      };

      if let Err(e) = self.output.render_result(&frame, &result, fps) {
        return Err(self.fail(PipelineError::Output(Box::new(e))));
      }
      self.transition(PipelineState::Ready);

      summary.frames += 1;
      summary.detections += result.len();
      summary.last_fps = fps;
      if summary.frames % FPS_LOG_INTERVAL == 0
        && let Some(fps) = fps
      {
        info!("第 {} 帧, {:.2} FPS", summary.frames, fps);
      }
    }

    info!(
      "主循环结束: {} 帧, {} 个目标",
      summary.frames, summary.detections
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use std::io::ErrorKind;
  use std::time::Duration;

  use image::Rgb;

  use super::*;
  use crate::{
    engine::{RawOutput, RawTensor},
    frame::{InputTensor, TensorShape},
    input::{ImageFileInput, ImageFileInputError},
    output::NullOutput,
  };

  const SHAPE: TensorShape = TensorShape::new(1, 3, 32, 32);

  /// 输入全零（预热）时返回空输出，否则返回固定输出或报错
  struct StubEngine {
    output: RawOutput,
    fail_on_frames: bool,
  }

  impl InferenceEngine for StubEngine {
    fn run(&self, input: &InputTensor) -> Result<RawOutput, EngineError> {
      let warmup = input.as_slice().iter().all(|v| *v == 0.0);
      match (warmup, self.fail_on_frames) {
        (true, _) => Ok(RawOutput::default()),
        (false, true) => Err(EngineError::Run("stub failure".into())),
        (false, false) => Ok(self.output.clone()),
      }
    }
  }

  struct StubBuilder {
    output: RawOutput,
    fail_load: bool,
    fail_on_frames: bool,
  }

  impl StubBuilder {
    fn one_box() -> Self {
      // 一个置信度 0.9 的 person
      let row = vec![0.0, 12.0, 12.0, 20.0, 20.0, 0.0, 0.9];
      Self {
        output: RawOutput::single(RawTensor::new("output", vec![1, 7], row)),
        fail_load: false,
        fail_on_frames: false,
      }
    }
  }

  impl EngineBuilder for StubBuilder {
    type Engine = StubEngine;

    fn model_uri(&self) -> String {
      "stub:yolo".into()
    }

    fn build(self, _shape: TensorShape) -> Result<StubEngine, EngineError> {
      if self.fail_load {
        return Err(EngineError::ModelLoad {
          uri: self.model_uri(),
          reason: "no such file".into(),
        });
      }
      Ok(StubEngine {
        output: self.output,
        fail_on_frames: self.fail_on_frames,
      })
    }
  }

  #[derive(Default)]
  struct RecordingNotifier {
    states: Vec<PipelineState>,
    alerts: Vec<String>,
  }

  impl Notifier for RecordingNotifier {
    fn state_changed(&mut self, state: PipelineState) {
      self.states.push(state);
    }

    fn alert(&mut self, error: &PipelineError) {
      self.alerts.push(error.to_string());
    }
  }

  fn config() -> PipelineConfig {
    PipelineConfig {
      input_shape: SHAPE,
      tick_interval: Duration::from_millis(1),
      ..Default::default()
    }
  }

  fn still_image() -> impl FnMut() -> Result<ImageFileInput, InputError> {
    || {
      Ok(ImageFileInput::from_image(
        RgbImage::from_pixel(32, 32, Rgb([200, 200, 200])),
        true,
      ))
    }
  }

  #[test]
  fn first_tick_has_no_fps() {
    let mut state = LoopState::new();
    let t0 = Instant::now();
    assert_eq!(state.record_tick(t0), None);
    assert_eq!(state.fps(), None);

    let fps = state.record_tick(t0 + Duration::from_millis(33)).unwrap();
    assert!((fps - 30.30).abs() < 0.01, "{fps}");
    assert_eq!(state.fps(), Some(fps));
  }

  #[test]
  fn runs_until_max_frames() {
    let mut notifier = RecordingNotifier::default();
    let mut output = NullOutput::default();
    let controller = LoopController::new(
      config().with_max_frames(Some(3)),
      still_image(),
      StubBuilder::one_box(),
      &mut output,
      &mut notifier,
    );

    let summary = controller.start().unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.detections, 3);
    assert_eq!(summary.inference_errors, 0);
    assert!(summary.last_fps.is_some());
    assert_eq!(output.frames(), 3);

    assert_eq!(
      &notifier.states[..5],
      &[
        PipelineState::LoadingEngine,
        PipelineState::WarmingUp,
        PipelineState::CameraPermissionPending,
        PipelineState::Ready,
        PipelineState::Detecting,
      ]
    );
    assert!(notifier.alerts.is_empty());
  }

  #[test]
  fn camera_denial_fails_without_reaching_ready() {
    let mut notifier = RecordingNotifier::default();
    let denied = || -> Result<ImageFileInput, InputError> {
      Err(ImageFileInputError::IoError(std::io::Error::from(ErrorKind::PermissionDenied)).into())
    };
    let controller = LoopController::new(
      config(),
      denied,
      StubBuilder::one_box(),
      NullOutput::default(),
      &mut notifier,
    );

    let error = controller.start().unwrap_err();
    assert_eq!(error.kind(), FailureKind::CameraAccess);
    assert_eq!(error.kind().exit_code(), 3);
    assert_eq!(
      notifier.states.last(),
      Some(&PipelineState::Failed(FailureKind::CameraAccess))
    );
    assert!(!notifier.states.contains(&PipelineState::Ready));
    assert_eq!(notifier.alerts.len(), 1);
  }

  #[test]
  fn model_load_failure_never_opens_camera() {
    let mut notifier = RecordingNotifier::default();
    let mut opened = 0;
    let factory = || -> Result<ImageFileInput, InputError> {
      opened += 1;
      Ok(ImageFileInput::from_image(RgbImage::new(8, 8), false))
    };
    let builder = StubBuilder {
      fail_load: true,
      ..StubBuilder::one_box()
    };
    let controller = LoopController::new(config(), factory, builder, NullOutput::default(), &mut notifier);

    let error = controller.start().unwrap_err();
    assert!(matches!(error, PipelineError::ModelLoad(_)));
    assert_eq!(error.kind().exit_code(), 2);
    assert_eq!(opened, 0);
    assert_eq!(
      notifier.states.last(),
      Some(&PipelineState::Failed(FailureKind::ModelLoad))
    );
    assert_eq!(notifier.alerts.len(), 1);
  }

  #[test]
  fn inference_errors_do_not_stop_the_loop() {
    let mut output = NullOutput::default();
    let builder = StubBuilder {
      fail_on_frames: true,
      ..StubBuilder::one_box()
    };
    let controller = LoopController::new(
      config().with_max_frames(Some(2)),
      still_image(),
      builder,
      &mut output,
      RecordingNotifier::default(),
    );

    let summary = controller.start().unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.inference_errors, 2);
    assert_eq!(summary.detections, 0);
    assert_eq!(output.frames(), 2);
  }

  #[test]
  fn stop_handle_ends_the_loop() {
    let controller = LoopController::new(
      config(),
      still_image(),
      StubBuilder::one_box(),
      NullOutput::default(),
      RecordingNotifier::default(),
    );
    controller.stop_handle().store(true, Ordering::SeqCst);

    let summary = controller.start().unwrap();
    assert_eq!(summary.frames, 0);
  }

  #[test]
  fn single_image_source_ends_the_loop() {
    let factory = || -> Result<ImageFileInput, InputError> {
      Ok(ImageFileInput::from_image(RgbImage::new(32, 32), false))
    };
    let controller = LoopController::new(
      config(),
      factory,
      StubBuilder::one_box(),
      NullOutput::default(),
      RecordingNotifier::default(),
    );

    assert_eq!(controller.start().unwrap().frames, 1);
  }
}
