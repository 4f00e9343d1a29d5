// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/task.rs - 逐帧检测任务
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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{thread, time::Duration};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  engine::{DetectionEngine, EngineError},
  input::{FramePull, InputError, InputSource},
  output::{OutputError, OutputWriter},
  session::{FinishedSession, PipelineSession},
};

const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// 协作式取消令牌，只在两帧之间检查，不会打断正在进行的推理
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 收到 Ctrl-C 时取消任务，30 秒内没有退出则强制结束进程
  pub fn cancel_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      token.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Running,
  Completed,
  Cancelled,
  Failed,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入错误: {0}")]
  Source(#[from] InputError),
  #[error("输出错误: {0}")]
  Sink(#[from] OutputError),
  #[error("检测引擎错误: {0}")]
  Engine(#[from] EngineError),
}

/// 一次运行的结果，失败或取消时已经处理的帧的类别仍然保留
#[derive(Debug)]
pub struct PipelineRun {
  pub state: PipelineState,
  pub session: FinishedSession,
  /// 输出生成的文件（视频或图像）
  pub artifact: Option<PathBuf>,
  pub error: Option<PipelineError>,
}

/// 从输入源逐帧读取、检测并写入输出
pub struct StreamPipeline<'e> {
  engine: &'e DetectionEngine,
  state: PipelineState,
  idle_backoff: Duration,
  max_frames: Option<u64>,
  max_idle: Option<u32>,
}

impl<'e> StreamPipeline<'e> {
  pub fn new(engine: &'e DetectionEngine) -> Self {
    Self {
      engine,
      state: PipelineState::Idle,
      idle_backoff: DEFAULT_IDLE_BACKOFF,
      max_frames: None,
      max_idle: None,
    }
  }

  /// 输入源暂时没有帧时的等待时间
  pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
    self.idle_backoff = idle_backoff;
    self
  }

  /// 处理指定帧数后结束
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 连续多少次没有新帧后结束（适用于摄像头）
  pub fn with_max_idle(mut self, max_idle: Option<u32>) -> Self {
    self.max_idle = max_idle;
    self
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn run<I, O>(
    &mut self,
    mut session: PipelineSession,
    source: &mut I,
    sink: &mut O,
  ) -> PipelineRun
  where
    I: InputSource + ?Sized,
    O: OutputWriter + ?Sized,
  {
    self.state = PipelineState::Running;
    info!(
      "开始任务: 模型 {:?}, 类别 {:?}",
      session.selection().models,
      session.selection().classes
    );
    sink.hint_fps(source.fps());

    let outcome = self.drive(&mut session, source, sink);

    let (state, artifact, error) = match outcome {
      Ok(state) => match sink.finish() {
        Ok(artifact) => (state, artifact, None),
        Err(e) => {
          error!("输出完成失败: {}", e);
          sink.abort();
          (PipelineState::Failed, None, Some(e.into()))
        }
      },
      Err(e) => {
        error!("任务失败: {}", e);
        sink.abort();
        (PipelineState::Failed, None, Some(e))
      }
    };

    self.state = state;
    let session = session.finish();
    info!(
      "任务结束: {:?}, 处理 {} 帧, {} 个缺陷",
      state,
      session.frames_processed(),
      session.labels().len()
    );

    PipelineRun {
      state,
      session,
      artifact,
      error,
    }
  }

  fn drive<I, O>(
    &self,
    session: &mut PipelineSession,
    source: &mut I,
    sink: &mut O,
  ) -> Result<PipelineState, PipelineError>
  where
    I: InputSource + ?Sized,
    O: OutputWriter + ?Sized,
  {
    let cancel = session.cancel_token();
    let mut idle = 0u32;
    let mut now = std::time::Instant::now();

    loop {
      if cancel.is_cancelled() {
        warn!("中断信号接收，退出任务循环");
        return Ok(PipelineState::Cancelled);
      }

      let frame = match source.next_frame()? {
        FramePull::End => {
          info!("输入结束");
          return Ok(PipelineState::Completed);
        }
        FramePull::Pending => {
          idle += 1;
          if self.max_idle.is_some_and(|max| idle >= max) {
            warn!("连续 {} 次没有收到新帧，结束任务", idle);
            return Ok(PipelineState::Completed);
          }
          thread::sleep(self.idle_backoff);
          continue;
        }
        FramePull::Skipped(e) => {
          idle = 0;
          warn!("跳过一帧: {}", e);
          session.record_skip(e);
          continue;
        }
        FramePull::Frame(frame) => frame,
      };
      idle = 0;

      if cancel.is_cancelled() {
        warn!("中断信号接收，第 {} 帧不再处理", frame.index);
        return Ok(PipelineState::Cancelled);
      }

      let outcome = self.engine.run(&frame, session.selection())?;
      let elapsed_a = now.elapsed();
      session.record_frame(frame.index, outcome.labels, outcome.failures);
      sink.write_frame(&outcome.annotated)?;
      let elapsed_b = now.elapsed();
      now = std::time::Instant::now();
      debug!(
        "第 {} 帧处理完成，耗时: {:.2?} / {:.2?}",
        frame.index, elapsed_a, elapsed_b
      );

      if self
        .max_frames
        .is_some_and(|max| session.frames_processed() >= max)
      {
        info!("达到指定帧数 {}, 退出任务循环", session.frames_processed());
        return Ok(PipelineState::Completed);
      }
    }
  }
}
