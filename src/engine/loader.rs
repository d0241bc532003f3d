// 该文件是 Jianshan （见山） 项目的一部分。
// src/engine/loader.rs - 后台加载推理会话
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

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, warn};

use crate::{
  engine::{EngineBuilder, EngineError, LoadStage, Session},
  frame::TensorShape,
};

/// 加载线程发回的事件
pub enum LoadEvent<E> {
  /// 正在加载模型文件
  Loading(String),
  /// 正在预热
  WarmingUp,
  /// 会话就绪
  Ready(Session<E>),
  /// 加载或预热失败
  Failed(EngineError),
}

impl<E> std::fmt::Debug for LoadEvent<E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LoadEvent::Loading(uri) => f.debug_tuple("Loading").field(uri).finish(),
      LoadEvent::WarmingUp => f.write_str("WarmingUp"),
      LoadEvent::Ready(session) => f.debug_tuple("Ready").field(&session.model_uri).finish(),
      LoadEvent::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
    }
  }
}

/// 在独立线程上创建会话，通过通道交付进度与结果
///
/// 主循环用 [`SessionLoader::poll`] 取事件，会话就绪之前不会阻塞调度。
pub struct SessionLoader<E> {
  rx: Receiver<LoadEvent<E>>,
  handle: Option<JoinHandle<()>>,
}

impl<E: crate::engine::InferenceEngine + Send + 'static> SessionLoader<E> {
  pub fn spawn<B>(builder: B, shape: TensorShape) -> Self
  where
    B: EngineBuilder<Engine = E>,
  {
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
      let progress_tx = tx.clone();
      let result = Session::create_with_progress(builder, shape, |stage| {
        let event = match stage {
          LoadStage::Loading(uri) => LoadEvent::Loading(uri),
          LoadStage::WarmingUp => LoadEvent::WarmingUp,
        };
        let _ = progress_tx.send(event);
      });

      let event = match result {
        Ok(session) => LoadEvent::Ready(session),
        Err(e) => {
          error!("会话创建失败: {}", e);
          LoadEvent::Failed(e)
        }
      };
      if tx.send(event).is_err() {
        warn!("主循环已退出，丢弃会话");
      }
    });

    Self {
      rx,
      handle: Some(handle),
    }
  }
}

impl<E> SessionLoader<E> {
  /// 最多等待 `timeout` 取一个事件；超时返回 None
  pub fn poll(&mut self, timeout: Duration) -> Option<LoadEvent<E>> {
    match self.rx.recv_timeout(timeout) {
      Ok(event) => Some(event),
      Err(RecvTimeoutError::Timeout) => None,
      Err(RecvTimeoutError::Disconnected) => {
        if let Some(handle) = self.handle.take() {
          let _ = handle.join();
        }
        Some(LoadEvent::Failed(EngineError::LoaderDisconnected))
      }
    }
  }
}
