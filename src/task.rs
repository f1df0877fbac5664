// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/task.rs - 实时推流任务
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

use std::{
  sync::mpsc::{Receiver, TryRecvError},
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  config::StreamerConfig,
  frame::encode_frame,
  output::Render,
  streamer::{
    Decision, Escalation, FailureOutcome, FrameStreamer, RenderableState, ResponseOutcome,
    StreamState, StreamStats,
  },
  transport::{ChannelConnector, DuplexChannel, Inbound},
};

/// 轮询通道的最长等待，保证命令能被及时处理
const MAX_POLL_WAIT: Duration = Duration::from_millis(50);

pub trait Task<I, C, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, connector: C, output: O) -> Result<Self::Output, Self::Error>;
}

/// 外部对推流会话下达的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Start(Duration),
  Stop,
  Retry,
  Abort,
  Teardown,
}

/// 连续失败达到阈值时被调用一次。决定通过 [`Command::Retry`] 或
/// [`Command::Abort`] 送回任务
pub trait DecisionHandler {
  fn on_decision_required(&mut self, escalation: Escalation);
}

impl<F: FnMut(Escalation)> DecisionHandler for F {
  fn on_decision_required(&mut self, escalation: Escalation) {
    self(escalation)
  }
}

enum Flow {
  Continue,
  Exit,
}

pub struct LiveTask {
  config: StreamerConfig,
  commands: Receiver<Command>,
  frame_number: Option<usize>,
  auto_start: bool,
  handler: Option<Box<dyn DecisionHandler>>,
}

impl LiveTask {
  pub fn new(config: StreamerConfig, commands: Receiver<Command>) -> Self {
    Self {
      config,
      commands,
      frame_number: None,
      auto_start: true,
      handler: None,
    }
  }

  /// 收到指定数量的有效响应后结束
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 关闭后需要显式发送 [`Command::Start`]
  pub fn with_auto_start(mut self, auto_start: bool) -> Self {
    self.auto_start = auto_start;
    self
  }

  pub fn with_decision_handler(mut self, handler: impl DecisionHandler + 'static) -> Self {
    self.handler = Some(Box::new(handler));
    self
  }

  fn apply(&self, command: Command, streamer: &mut FrameStreamer) -> Flow {
    let now = Instant::now();
    debug!("收到指令 {:?}", command);
    match command {
      Command::Start(interval) => {
        streamer.start(interval, now);
      }
      Command::Stop => {
        streamer.stop();
      }
      Command::Retry => {
        streamer.resolve_decision(Decision::Retry, now);
      }
      Command::Abort => {
        streamer.resolve_decision(Decision::Abort, now);
      }
      Command::Teardown => return Flow::Exit,
    }
    Flow::Continue
  }

  fn drain_commands(&self, streamer: &mut FrameStreamer) -> Flow {
    loop {
      match self.commands.try_recv() {
        Ok(command) => {
          if let Flow::Exit = self.apply(command, streamer) {
            return Flow::Exit;
          }
        }
        // 发送端全部释放后仍可以按帧数或输入结束退出
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Flow::Continue,
      }
    }
  }

  fn escalate(&mut self, outcome: FailureOutcome) {
    if let FailureOutcome::Escalated(escalation) = outcome {
      match self.handler.as_mut() {
        Some(handler) => handler.on_decision_required(escalation),
        None => warn!(
          "连续失败 {} 次，推流已暂停，等待重试或放弃指令",
          escalation.consecutive_errors
        ),
      }
    }
  }
}

fn close_channel<Ch: DuplexChannel>(
  channel: &mut Option<Ch>,
  streamer: &mut FrameStreamer,
  pending_frame: &mut Option<RgbImage>,
) {
  if let Some(mut ch) = channel.take() {
    ch.close();
  }
  *pending_frame = None;
  streamer.on_channel_closed(streamer.session(), Instant::now());
}

impl<I, C, O, RE> Task<I, C, O> for LiveTask
where
  I: Iterator<Item = RgbImage>,
  C: ChannelConnector,
  O: Render<RgbImage, RenderableState, Error = RE>,
  RE: std::fmt::Display,
{
  type Output = StreamStats;
  type Error = anyhow::Error;

  fn run_task(mut self, mut input: I, connector: C, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始推流任务...");
    let mut streamer = FrameStreamer::new(&self.config);
    let mut channel: Option<C::Channel> = None;
    // 与在途帧配对的原始画面，用于绘制返回的检测框
    let mut pending_frame: Option<RgbImage> = None;
    let mut rendered = 0usize;

    if self.auto_start {
      streamer.start(self.config.interval, Instant::now());
    }

    loop {
      if let Flow::Exit = self.drain_commands(&mut streamer) {
        info!("收到拆除指令，退出任务循环");
        break;
      }
      if streamer.state() == StreamState::Terminated {
        break;
      }

      let now = Instant::now();
      streamer.reconnect_due(now);
      if channel.is_none() && streamer.state() == StreamState::Connecting {
        let session = streamer.session();
        match connector.connect() {
          Ok(ch) => {
            streamer.set_ordered_replies(ch.replies_in_order());
            channel = Some(ch);
            streamer.on_channel_open(session, Instant::now());
          }
          Err(e) => {
            warn!("会话 {} 连接失败: {}", session.id(), e);
            streamer.on_channel_closed(session, Instant::now());
          }
        }
      }

      let outcome = streamer.check_timeout(Instant::now());
      if outcome != FailureOutcome::Ignored {
        pending_frame = None;
        self.escalate(outcome);
      }
      if channel.is_some() && streamer.stale_replies_expired(Instant::now()) {
        warn!("已放弃帧的应答迟迟未到，重建通道");
        close_channel(&mut channel, &mut streamer, &mut pending_frame);
      }

      if let Some(permit) = streamer.tick(Instant::now()) {
        let Some(raw) = input.next() else {
          info!("输入已结束，退出任务循环");
          streamer.abandon_capture(permit);
          break;
        };

        let encoded = match encode_frame(&raw, self.config.target_width, self.config.jpeg_quality) {
          Ok(encoded) => encoded,
          Err(e) => {
            warn!("帧编码失败: {}", e);
            streamer.abandon_capture(permit);
            continue;
          }
        };

        // 采集期间到达的停止指令会让许可失效
        if let Flow::Exit = self.drain_commands(&mut streamer) {
          info!("收到拆除指令，退出任务循环");
          break;
        }

        match channel.as_mut() {
          Some(ch) if streamer.commit_send(permit, Instant::now()) => {
            if let Err(e) = ch.send_frame(&encoded) {
              warn!("发送帧失败: {}", e);
              close_channel(&mut channel, &mut streamer, &mut pending_frame);
            } else {
              pending_frame = Some(raw);
            }
          }
          Some(_) => {}
          None => streamer.abandon_capture(permit),
        }
      }

      let wait = streamer
        .next_deadline()
        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        .unwrap_or(MAX_POLL_WAIT)
        .clamp(Duration::from_millis(1), MAX_POLL_WAIT);

      let Some(ch) = channel.as_mut() else {
        thread::sleep(wait);
        continue;
      };

      let session = streamer.session();
      match ch.poll(wait) {
        Ok(Inbound::Nothing) => {}
        Ok(Inbound::Response(response)) => match streamer.on_response(session, response) {
          ResponseOutcome::Updated(state) => {
            rendered += 1;
            info!(
              "第 {} 帧: {} 个检测，跟踪总数 {:?}，服务器耗时 {:?} ms",
              rendered,
              state.detections.len(),
              state.total_tracked_pigs,
              state.processing_time_ms
            );
            if let Some(frame) = pending_frame.take()
              && let Err(e) = output.render_result(&frame, &state)
            {
              warn!("渲染失败: {}", e);
            }
            if self.frame_number.is_some_and(|n| rendered >= n) {
              info!("达到指定帧数 {}, 退出任务循环", rendered);
              break;
            }
          }
          ResponseOutcome::SoftError { message, outcome } => {
            warn!("服务器报告错误: {}", message);
            pending_frame = None;
            self.escalate(outcome);
          }
          ResponseOutcome::Discarded => {}
        },
        Ok(Inbound::FrameFailed(reason)) => {
          let outcome = streamer.on_transport_error(session, &reason);
          if outcome != FailureOutcome::Ignored {
            pending_frame = None;
          }
          self.escalate(outcome);
        }
        Err(e) => {
          warn!("通道错误: {}", e);
          close_channel(&mut channel, &mut streamer, &mut pending_frame);
        }
      }
    }

    streamer.teardown();
    if let Some(mut ch) = channel.take() {
      ch.close();
    }

    let stats = streamer.stats().clone();
    info!(
      "任务完成: 发送 {} 帧，收到 {} 个响应，丢弃 {} 次采集，错误 {} 次，重连 {} 次",
      stats.frames_sent, stats.responses, stats.dropped_ticks, stats.error_count, stats.reconnects
    );
    Ok(stats)
  }
}
