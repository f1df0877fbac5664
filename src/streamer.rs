// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/streamer.rs - 实时推流状态机
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

//! # 推流状态机
//!
//! `FrameStreamer` 不做任何 I/O，只根据调用方传入的时间与事件推进状态：
//!
//! - 定时器每次到期时，只有在没有在途帧、也没有正在采集的帧时才发放
//!   [`CapturePermit`]，否则本次 tick 直接丢弃，不排队；
//! - 每次 [`FrameStreamer::commit_send`] 成功后在途计数置 1，之后恰好被
//!   响应、服务器错误、传输失败或超时中的一个清零；
//! - 通道关闭时整个会话作废，检测结果清空，等待固定退避后以新的
//!   [`SessionToken`] 重连；
//! - 连续失败达到阈值时暂停推流，并且只上报一次 [`Escalation`]；在用户
//!   决定之前，即使通道重连也保持暂停；
//! - 按序应答的通道上，超时或停止而放弃的帧仍会收到应答。这些迟到的应答
//!   按放弃的次数依次丢弃，丢完之前不发新帧。
//!
//! 迟到的回调用会话令牌与推流纪元（epoch）校验，过期的一律忽略。

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
  config::StreamerConfig,
  geometry::{DisplayBox, Size, map_to_display},
  model::{Detection, StreamResponse},
};

/// 会话标识，每次重连递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
  pub fn id(&self) -> u64 {
    self.0
  }

  fn next(self) -> Self {
    SessionToken(self.0 + 1)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
  Connecting,
  Connected,
  Streaming,
  /// 连续失败过多，等待用户决定
  Paused,
  /// 通道已断开，等待重连
  Closed,
  /// 外部显式拆除，不再重连
  Terminated,
}

/// 采集许可，绑定发放时的会话与纪元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePermit {
  session: SessionToken,
  epoch: u64,
}

impl CapturePermit {
  pub fn session(&self) -> SessionToken {
    self.session
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Retry,
  Abort,
}

/// 需要用户在重试与放弃之间做出选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
  pub consecutive_errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
  /// 没有在途帧，或者来自过期会话
  Ignored,
  Counted,
  Escalated(Escalation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
  Updated(RenderableState),
  SoftError {
    message: String,
    outcome: FailureOutcome,
  },
  Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
  pub frames_sent: u64,
  pub responses: u64,
  pub dropped_ticks: u64,
  pub discarded_captures: u64,
  pub error_count: u64,
  pub consecutive_errors: u32,
  pub reconnects: u64,
}

/// 一次成功响应之后可直接绘制的状态
#[derive(Debug, Clone, PartialEq)]
pub struct RenderableState {
  pub detections: Vec<Detection>,
  /// 与 `detections` 来自同一个响应的帧尺寸
  pub frame_size: Size,
  pub fps: Option<f64>,
  pub total_tracked_pigs: Option<u32>,
  pub processing_time_ms: Option<f64>,
  pub frame_count: Option<u64>,
  pub error_count: u64,
}

impl RenderableState {
  /// 每次调用都按本响应的帧尺寸重新计算映射
  pub fn display_boxes(&self, display: Size) -> Vec<DisplayBox> {
    self
      .detections
      .iter()
      .filter_map(|detection| map_to_display(detection, self.frame_size, display))
      .collect()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
  sent_at: Instant,
}

#[derive(Debug)]
pub struct FrameStreamer {
  interval: Duration,
  frame_timeout: Duration,
  reconnect_backoff: Duration,
  error_threshold: u32,

  state: StreamState,
  session: SessionToken,
  epoch: u64,
  wants_streaming: bool,
  awaiting_decision: bool,
  ordered_replies: bool,
  /// 已放弃但服务器仍会应答的帧数
  stale_replies: u32,
  stale_deadline: Option<Instant>,
  next_tick: Option<Instant>,
  capturing: Option<CapturePermit>,
  in_flight: Option<InFlight>,
  reconnect_at: Option<Instant>,
  latest: Option<RenderableState>,
  stats: StreamStats,
}

impl FrameStreamer {
  pub fn new(config: &StreamerConfig) -> Self {
    Self {
      interval: config.interval.max(Duration::from_millis(1)),
      frame_timeout: config.frame_timeout,
      reconnect_backoff: config.reconnect_backoff,
      error_threshold: config.error_threshold.max(1),
      state: StreamState::Connecting,
      session: SessionToken(1),
      epoch: 0,
      wants_streaming: false,
      awaiting_decision: false,
      ordered_replies: false,
      stale_replies: 0,
      stale_deadline: None,
      next_tick: None,
      capturing: None,
      in_flight: None,
      reconnect_at: None,
      latest: None,
      stats: StreamStats::default(),
    }
  }

  pub fn state(&self) -> StreamState {
    self.state
  }

  pub fn session(&self) -> SessionToken {
    self.session
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// 在途请求数，恒为 0 或 1
  pub fn outstanding(&self) -> usize {
    usize::from(self.in_flight.is_some())
  }

  pub fn is_capturing(&self) -> bool {
    self.capturing.is_some()
  }

  pub fn stats(&self) -> &StreamStats {
    &self.stats
  }

  pub fn latest(&self) -> Option<&RenderableState> {
    self.latest.as_ref()
  }

  pub fn decision_pending(&self) -> bool {
    self.awaiting_decision
  }

  /// 尚未收到的迟到应答数
  pub fn stale_replies(&self) -> u32 {
    self.stale_replies
  }

  /// 通道按发送顺序逐帧应答时置为 `true`，放弃的帧的应答会被跳过
  pub fn set_ordered_replies(&mut self, ordered: bool) {
    self.ordered_replies = ordered;
  }

  /// 最近需要被唤醒处理的时刻：定时器、帧超时或重连
  pub fn next_deadline(&self) -> Option<Instant> {
    let tick = if self.state == StreamState::Streaming {
      self.next_tick
    } else {
      None
    };
    let timeout = self.in_flight.map(|f| f.sent_at + self.frame_timeout);
    [tick, timeout, self.stale_deadline, self.reconnect_at]
      .into_iter()
      .flatten()
      .min()
  }

  /// 通道建立。过期会话的回调返回 `false`
  pub fn on_channel_open(&mut self, session: SessionToken, now: Instant) -> bool {
    if session != self.session || self.state != StreamState::Connecting {
      debug!("忽略过期会话 {} 的连接事件", session.id());
      return false;
    }
    info!("会话 {} 已连接", session.id());
    self.state = StreamState::Connected;
    if self.awaiting_decision {
      info!("仍在等待用户决定，保持暂停");
      self.state = StreamState::Paused;
    } else if self.wants_streaming {
      self.begin_streaming(now);
    }
    true
  }

  fn begin_streaming(&mut self, now: Instant) {
    self.state = StreamState::Streaming;
    self.epoch += 1;
    self.next_tick = Some(now);
  }

  /// 开始周期采集。未连接时只记录意图，连接建立后自动开始
  pub fn start(&mut self, interval: Duration, now: Instant) -> bool {
    if self.state == StreamState::Terminated {
      return false;
    }
    self.interval = interval.max(Duration::from_millis(1));
    self.wants_streaming = true;
    match self.state {
      StreamState::Connected => {
        info!("开始推流，周期 {:?}", self.interval);
        self.begin_streaming(now);
        true
      }
      StreamState::Streaming => {
        self.next_tick = Some(now);
        true
      }
      _ => false,
    }
  }

  /// 停止推流，幂等
  pub fn stop(&mut self) -> bool {
    let active = matches!(self.state, StreamState::Streaming | StreamState::Paused);
    if !active
      && !self.wants_streaming
      && !self.awaiting_decision
      && self.next_tick.is_none()
      && self.capturing.is_none()
      && self.in_flight.is_none()
    {
      return false;
    }

    info!("停止推流");
    self.wants_streaming = false;
    self.awaiting_decision = false;
    self.cancel_timers();
    if active {
      self.state = StreamState::Connected;
    }
    true
  }

  fn cancel_timers(&mut self) {
    self.epoch += 1;
    self.next_tick = None;
    self.capturing = None;
    self.abandon_in_flight();
  }

  fn abandon_in_flight(&mut self) {
    if self.in_flight.take().is_some() && self.ordered_replies {
      self.stale_replies += 1;
    }
  }

  /// 吞掉一条迟到的应答，返回是否吞掉
  fn swallow_stale_reply(&mut self) -> bool {
    if self.stale_replies == 0 {
      return false;
    }
    self.stale_replies -= 1;
    if self.stale_replies == 0 {
      self.stale_deadline = None;
    }
    debug!("丢弃已放弃帧的迟到应答，剩余 {} 条", self.stale_replies);
    true
  }

  /// 定时器推进。返回许可时调用方应采集并编码一帧
  pub fn tick(&mut self, now: Instant) -> Option<CapturePermit> {
    if self.state != StreamState::Streaming {
      return None;
    }
    let due = self.next_tick?;
    if now < due {
      return None;
    }

    let next = due + self.interval;
    self.next_tick = Some(if next > now { next } else { now + self.interval });

    if self.in_flight.is_some() || self.capturing.is_some() || self.stale_replies > 0 {
      self.stats.dropped_ticks += 1;
      debug!("上一帧尚未返回，跳过本次采集");
      return None;
    }

    let permit = CapturePermit {
      session: self.session,
      epoch: self.epoch,
    };
    self.capturing = Some(permit);
    Some(permit)
  }

  fn permit_is_live(&self, permit: &CapturePermit) -> bool {
    self.capturing.as_ref() == Some(permit)
      && self.state == StreamState::Streaming
      && permit.session == self.session
      && permit.epoch == self.epoch
  }

  /// 采集编码完成后登记发送。许可已失效时返回 `false`，调用方必须丢弃该帧
  pub fn commit_send(&mut self, permit: CapturePermit, now: Instant) -> bool {
    if !self.permit_is_live(&permit) {
      self.stats.discarded_captures += 1;
      if self.capturing.as_ref() == Some(&permit) {
        self.capturing = None;
      }
      debug!("采集完成时会话已停止或重建，丢弃该帧");
      return false;
    }
    self.capturing = None;
    self.in_flight = Some(InFlight { sent_at: now });
    self.stats.frames_sent += 1;
    true
  }

  /// 采集或编码失败，不计入在途
  pub fn abandon_capture(&mut self, permit: CapturePermit) {
    if self.capturing.as_ref() == Some(&permit) {
      self.capturing = None;
    }
  }

  pub fn on_response(&mut self, session: SessionToken, response: StreamResponse) -> ResponseOutcome {
    if session != self.session || self.swallow_stale_reply() || self.in_flight.is_none() {
      debug!("没有对应的在途帧，丢弃响应");
      return ResponseOutcome::Discarded;
    }
    self.in_flight = None;
    self.stats.responses += 1;

    if let Some(message) = response.error {
      let outcome = self.record_failure(&message);
      return ResponseOutcome::SoftError { message, outcome };
    }

    let Some(frame_size) = response.frame_size() else {
      let message = String::from("响应缺少帧尺寸");
      let outcome = self.record_failure(&message);
      return ResponseOutcome::SoftError { message, outcome };
    };

    self.stats.consecutive_errors = 0;
    let state = RenderableState {
      detections: response.detections,
      frame_size,
      fps: response.fps,
      total_tracked_pigs: response.total_tracked_pigs,
      processing_time_ms: response.processing_time_ms,
      frame_count: response.frame_count,
      error_count: self.stats.error_count,
    };
    self.latest = Some(state.clone());
    ResponseOutcome::Updated(state)
  }

  /// 单帧传输失败（含服务器返回的非 JSON 或非 2xx）
  pub fn on_transport_error(&mut self, session: SessionToken, reason: &str) -> FailureOutcome {
    if session != self.session || self.swallow_stale_reply() || self.in_flight.is_none() {
      return FailureOutcome::Ignored;
    }
    self.in_flight = None;
    self.record_failure(reason)
  }

  /// 在途帧等待超时按传输失败处理
  pub fn check_timeout(&mut self, now: Instant) -> FailureOutcome {
    let outcome = match self.in_flight {
      Some(flight) if now.saturating_duration_since(flight.sent_at) >= self.frame_timeout => {
        self.abandon_in_flight();
        self.record_failure("等待响应超时")
      }
      _ => FailureOutcome::Ignored,
    };
    if self.stale_replies > 0 && self.stale_deadline.is_none() {
      self.stale_deadline = Some(now + self.frame_timeout);
    }
    outcome
  }

  /// 迟到的应答在又一个超时周期内仍未到齐，通道的应答顺序已不可信
  pub fn stale_replies_expired(&self, now: Instant) -> bool {
    self.stale_deadline.is_some_and(|deadline| now >= deadline)
  }

  fn record_failure(&mut self, reason: &str) -> FailureOutcome {
    self.stats.error_count += 1;
    self.stats.consecutive_errors += 1;
    warn!(
      "帧处理失败 ({} 次连续): {}",
      self.stats.consecutive_errors, reason
    );

    if self.stats.consecutive_errors >= self.error_threshold && self.state == StreamState::Streaming
    {
      self.state = StreamState::Paused;
      self.awaiting_decision = true;
      self.next_tick = None;
      self.epoch += 1;
      warn!("连续失败达到阈值，暂停推流等待用户决定");
      return FailureOutcome::Escalated(Escalation {
        consecutive_errors: self.stats.consecutive_errors,
      });
    }
    FailureOutcome::Counted
  }

  /// 处理用户决定。通道断开期间做出的决定在重连后生效
  pub fn resolve_decision(&mut self, decision: Decision, now: Instant) -> bool {
    if !self.awaiting_decision {
      return false;
    }
    self.awaiting_decision = false;
    self.stats.consecutive_errors = 0;

    if self.state != StreamState::Paused {
      if decision == Decision::Abort {
        self.wants_streaming = false;
      }
      info!("通道未连接，决定 {:?} 将在重连后生效", decision);
      return true;
    }

    match decision {
      Decision::Retry => {
        info!("用户选择重试，恢复推流");
        self.begin_streaming(now);
      }
      Decision::Abort => {
        info!("用户选择放弃，停止推流");
        self.wants_streaming = false;
        self.cancel_timers();
        self.state = StreamState::Connected;
      }
    }
    true
  }

  /// 通道关闭或出错，整个会话作废并安排重连
  pub fn on_channel_closed(&mut self, session: SessionToken, now: Instant) -> bool {
    if session != self.session
      || matches!(self.state, StreamState::Closed | StreamState::Terminated)
    {
      return false;
    }
    warn!(
      "会话 {} 的通道已关闭，{:?} 后重连",
      session.id(),
      self.reconnect_backoff
    );
    self.cancel_timers();
    self.stale_replies = 0;
    self.stale_deadline = None;
    self.latest = None;
    self.stats.consecutive_errors = 0;
    self.state = StreamState::Closed;
    self.reconnect_at = Some(now + self.reconnect_backoff);
    true
  }

  /// 退避结束时创建新会话，返回需要连接的令牌
  pub fn reconnect_due(&mut self, now: Instant) -> Option<SessionToken> {
    if self.state != StreamState::Closed {
      return None;
    }
    match self.reconnect_at {
      Some(at) if now >= at => {
        self.reconnect_at = None;
        self.session = self.session.next();
        self.state = StreamState::Connecting;
        self.stats.reconnects += 1;
        info!("开始重连，会话 {}", self.session.id());
        Some(self.session)
      }
      _ => None,
    }
  }

  /// 所属视图销毁，不再重连
  pub fn teardown(&mut self) {
    if self.state == StreamState::Terminated {
      return;
    }
    info!("拆除推流会话 {}", self.session.id());
    self.wants_streaming = false;
    self.awaiting_decision = false;
    self.cancel_timers();
    self.reconnect_at = None;
    self.latest = None;
    self.state = StreamState::Terminated;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Behavior;

  fn config() -> StreamerConfig {
    StreamerConfig {
      interval: Duration::from_millis(100),
      frame_timeout: Duration::from_secs(2),
      reconnect_backoff: Duration::from_secs(3),
      error_threshold: 5,
      ..StreamerConfig::default()
    }
  }

  fn reply(width: u32, height: u32) -> StreamResponse {
    StreamResponse {
      detections: vec![Detection {
        bbox: [100.0, 100.0, 200.0, 200.0],
        behavior: Behavior::Eating,
        confidence: 0.9,
        pig_id: Some(1),
      }],
      frame_width: Some(width),
      frame_height: Some(height),
      fps: Some(8.0),
      total_tracked_pigs: Some(3),
      ..StreamResponse::default()
    }
  }

  fn streaming(now: Instant) -> FrameStreamer {
    let mut streamer = FrameStreamer::new(&config());
    let session = streamer.session();
    assert!(streamer.on_channel_open(session, now));
    assert!(streamer.start(Duration::from_millis(100), now));
    streamer
  }

  /// 发出一帧并返回会话
  fn send_one(streamer: &mut FrameStreamer, now: Instant) -> SessionToken {
    let permit = streamer.tick(now).expect("tick should grant a capture");
    assert!(streamer.commit_send(permit, now));
    streamer.session()
  }

  #[test]
  fn initial_state_is_connecting() {
    let streamer = FrameStreamer::new(&config());
    assert_eq!(streamer.state(), StreamState::Connecting);
    assert_eq!(streamer.outstanding(), 0);
  }

  #[test]
  fn ticks_never_issue_a_second_request_while_one_is_outstanding() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    send_one(&mut streamer, t0);

    for i in 1..=20 {
      let now = t0 + Duration::from_millis(100 * i);
      assert!(streamer.tick(now).is_none());
      assert!(streamer.outstanding() <= 1);
    }
    assert_eq!(streamer.stats().frames_sent, 1);
    assert_eq!(streamer.stats().dropped_ticks, 20);
  }

  #[test]
  fn tick_before_deadline_is_a_no_op() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let permit = streamer.tick(t0).unwrap();
    streamer.abandon_capture(permit);
    assert!(streamer.tick(t0 + Duration::from_millis(50)).is_none());
    assert_eq!(streamer.stats().dropped_ticks, 0);
    assert!(streamer.tick(t0 + Duration::from_millis(100)).is_some());
  }

  #[test]
  fn capturing_blocks_further_ticks() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let _permit = streamer.tick(t0).unwrap();
    assert!(streamer.tick(t0 + Duration::from_millis(100)).is_none());
    assert_eq!(streamer.stats().dropped_ticks, 1);
  }

  #[test]
  fn every_send_is_matched_by_exactly_one_decrement() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);

    // 成功响应
    let session = send_one(&mut streamer, t0);
    assert_eq!(streamer.outstanding(), 1);
    assert!(matches!(
      streamer.on_response(session, reply(800, 450)),
      ResponseOutcome::Updated(_)
    ));
    assert_eq!(streamer.outstanding(), 0);
    assert_eq!(
      streamer.on_response(session, reply(800, 450)),
      ResponseOutcome::Discarded
    );

    // 服务器报告的错误
    let now = t0 + Duration::from_millis(100);
    let session = send_one(&mut streamer, now);
    let soft = StreamResponse {
      error: Some("Could not decode image".into()),
      ..StreamResponse::default()
    };
    assert!(matches!(
      streamer.on_response(session, soft),
      ResponseOutcome::SoftError {
        outcome: FailureOutcome::Counted,
        ..
      }
    ));
    assert_eq!(streamer.outstanding(), 0);

    // 传输失败，重复上报不会重复扣减
    let now = t0 + Duration::from_millis(200);
    let session = send_one(&mut streamer, now);
    assert_eq!(
      streamer.on_transport_error(session, "connection reset"),
      FailureOutcome::Counted
    );
    assert_eq!(
      streamer.on_transport_error(session, "connection reset"),
      FailureOutcome::Ignored
    );
    assert_eq!(streamer.outstanding(), 0);
    assert_eq!(streamer.stats().frames_sent, 3);
    assert_eq!(streamer.stats().error_count, 2);
  }

  #[test]
  fn soft_error_keeps_previous_detections() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let session = send_one(&mut streamer, t0);
    streamer.on_response(session, reply(800, 450));

    let session = send_one(&mut streamer, t0 + Duration::from_millis(100));
    let soft = StreamResponse {
      error: Some("boom".into()),
      ..StreamResponse::default()
    };
    streamer.on_response(session, soft);

    let latest = streamer.latest().unwrap();
    assert_eq!(latest.detections.len(), 1);
    assert_eq!(latest.frame_size, Size::new(800, 450));
    assert_eq!(streamer.stats().error_count, 1);
  }

  #[test]
  fn response_without_frame_size_is_a_soft_error() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let session = send_one(&mut streamer, t0);
    let mut missing = reply(800, 450);
    missing.frame_height = None;
    assert!(matches!(
      streamer.on_response(session, missing),
      ResponseOutcome::SoftError { .. }
    ));
    assert!(streamer.latest().is_none());
  }

  #[test]
  fn renderable_state_uses_the_response_frame_size() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let session = send_one(&mut streamer, t0);
    let ResponseOutcome::Updated(state) = streamer.on_response(session, reply(800, 450)) else {
      panic!("expected update");
    };
    let boxes = state.display_boxes(Size::new(1600, 900));
    assert_eq!(boxes[0].rect.x1, 200.0);
    assert_eq!(boxes[0].rect.y2, 400.0);
    assert_eq!(state.total_tracked_pigs, Some(3));
  }

  #[test]
  fn timeout_counts_as_transport_failure() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    send_one(&mut streamer, t0);
    assert_eq!(
      streamer.check_timeout(t0 + Duration::from_secs(1)),
      FailureOutcome::Ignored
    );
    assert_eq!(
      streamer.check_timeout(t0 + Duration::from_secs(2)),
      FailureOutcome::Counted
    );
    assert_eq!(streamer.outstanding(), 0);
    assert_eq!(streamer.state(), StreamState::Streaming);
  }

  #[test]
  fn five_consecutive_failures_surface_exactly_one_decision() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let mut escalations = 0;

    for i in 0..10u64 {
      let now = t0 + Duration::from_millis(100 * i);
      if let Some(permit) = streamer.tick(now) {
        assert!(streamer.commit_send(permit, now));
        if let FailureOutcome::Escalated(escalation) =
          streamer.on_transport_error(streamer.session(), "unreachable")
        {
          assert_eq!(escalation.consecutive_errors, 5);
          escalations += 1;
        }
      }
    }

    assert_eq!(escalations, 1);
    assert_eq!(streamer.stats().frames_sent, 5);
    assert_eq!(streamer.state(), StreamState::Paused);
    assert!(streamer.decision_pending());

    let later = t0 + Duration::from_secs(5);
    assert!(streamer.tick(later).is_none());
    assert!(streamer.resolve_decision(Decision::Retry, later));
    assert_eq!(streamer.stats().consecutive_errors, 0);
    assert!(streamer.tick(later).is_some());
  }

  #[test]
  fn success_resets_consecutive_errors() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    for i in 0..4u64 {
      let session = send_one(&mut streamer, t0 + Duration::from_millis(100 * i));
      streamer.on_transport_error(session, "flaky");
    }
    let session = send_one(&mut streamer, t0 + Duration::from_millis(400));
    streamer.on_response(session, reply(640, 360));
    assert_eq!(streamer.stats().consecutive_errors, 0);
    let session = send_one(&mut streamer, t0 + Duration::from_millis(500));
    assert_eq!(
      streamer.on_transport_error(session, "flaky"),
      FailureOutcome::Counted
    );
  }

  #[test]
  fn abort_decision_stops_streaming() {
    let t0 = Instant::now();
    let mut streamer = FrameStreamer::new(&StreamerConfig {
      error_threshold: 1,
      ..config()
    });
    streamer.on_channel_open(streamer.session(), t0);
    streamer.start(Duration::from_millis(100), t0);
    let session = send_one(&mut streamer, t0);
    assert!(matches!(
      streamer.on_transport_error(session, "down"),
      FailureOutcome::Escalated(_)
    ));
    assert!(streamer.resolve_decision(Decision::Abort, t0));
    assert_eq!(streamer.state(), StreamState::Connected);
    assert!(streamer.tick(t0 + Duration::from_secs(1)).is_none());
    assert!(!streamer.resolve_decision(Decision::Retry, t0));
  }

  #[test]
  fn late_capture_after_stop_is_discarded() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let permit = streamer.tick(t0).unwrap();

    assert!(streamer.stop());
    assert!(!streamer.commit_send(permit, t0 + Duration::from_millis(30)));
    assert_eq!(streamer.outstanding(), 0);
    assert_eq!(streamer.stats().frames_sent, 0);
    assert_eq!(streamer.stats().discarded_captures, 1);

    // 重新开始也不能复活旧许可
    streamer.start(Duration::from_millis(100), t0);
    assert!(!streamer.commit_send(permit, t0 + Duration::from_millis(40)));
  }

  #[test]
  fn stop_resets_outstanding_and_is_idempotent() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let session = send_one(&mut streamer, t0);
    assert!(streamer.stop());
    assert_eq!(streamer.outstanding(), 0);
    assert_eq!(streamer.state(), StreamState::Connected);
    assert!(!streamer.stop());
    assert_eq!(streamer.state(), StreamState::Connected);

    // 停止后迟到的响应不会恢复推流
    assert_eq!(
      streamer.on_response(session, reply(800, 450)),
      ResponseOutcome::Discarded
    );
    assert!(streamer.tick(t0 + Duration::from_secs(1)).is_none());
  }

  #[test]
  fn channel_close_clears_state_and_reconnects_after_backoff() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let first = send_one(&mut streamer, t0);
    streamer.on_response(first, reply(800, 450));
    send_one(&mut streamer, t0 + Duration::from_millis(100));

    let closed_at = t0 + Duration::from_millis(150);
    assert!(streamer.on_channel_closed(first, closed_at));
    assert_eq!(streamer.state(), StreamState::Closed);
    assert_eq!(streamer.outstanding(), 0);
    assert!(streamer.latest().is_none());
    assert!(streamer.tick(closed_at + Duration::from_millis(100)).is_none());

    assert!(streamer.reconnect_due(closed_at + Duration::from_secs(2)).is_none());
    let second = streamer
      .reconnect_due(closed_at + Duration::from_secs(3))
      .unwrap();
    assert_ne!(first, second);
    assert_eq!(streamer.state(), StreamState::Connecting);

    // 旧会话的回调全部被忽略
    assert!(!streamer.on_channel_open(first, closed_at));
    assert!(!streamer.on_channel_closed(first, closed_at));
    assert_eq!(
      streamer.on_response(first, reply(800, 450)),
      ResponseOutcome::Discarded
    );

    let reopened = closed_at + Duration::from_secs(3);
    assert!(streamer.on_channel_open(second, reopened));
    assert_eq!(streamer.state(), StreamState::Streaming);
    assert!(streamer.latest().is_none());
    let session = send_one(&mut streamer, reopened);
    assert!(matches!(
      streamer.on_response(session, reply(640, 360)),
      ResponseOutcome::Updated(_)
    ));
    assert_eq!(streamer.latest().unwrap().frame_size, Size::new(640, 360));
  }

  #[test]
  fn start_before_connect_begins_streaming_on_open() {
    let t0 = Instant::now();
    let mut streamer = FrameStreamer::new(&config());
    assert!(!streamer.start(Duration::from_millis(100), t0));
    assert_eq!(streamer.state(), StreamState::Connecting);
    streamer.on_channel_open(streamer.session(), t0);
    assert_eq!(streamer.state(), StreamState::Streaming);
  }

  #[test]
  fn teardown_is_terminal() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    let session = streamer.session();
    streamer.teardown();
    assert_eq!(streamer.state(), StreamState::Terminated);
    assert!(!streamer.on_channel_closed(session, t0));
    assert!(streamer.reconnect_due(t0 + Duration::from_secs(60)).is_none());
    assert!(!streamer.start(Duration::from_millis(100), t0));
  }

  #[test]
  fn next_deadline_tracks_tick_timeout_and_reconnect() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    assert_eq!(streamer.next_deadline(), Some(t0));
    send_one(&mut streamer, t0);
    assert_eq!(
      streamer.next_deadline(),
      Some(t0 + Duration::from_millis(100))
    );
    streamer.on_channel_closed(streamer.session(), t0);
    assert_eq!(streamer.next_deadline(), Some(t0 + Duration::from_secs(3)));
  }

  fn escalated(now: Instant) -> FrameStreamer {
    let mut streamer = FrameStreamer::new(&StreamerConfig {
      error_threshold: 1,
      ..config()
    });
    streamer.on_channel_open(streamer.session(), now);
    streamer.start(Duration::from_millis(100), now);
    let session = send_one(&mut streamer, now);
    assert!(matches!(
      streamer.on_transport_error(session, "down"),
      FailureOutcome::Escalated(_)
    ));
    streamer
  }

  #[test]
  fn reconnect_keeps_a_pending_decision_paused() {
    let t0 = Instant::now();
    let mut streamer = escalated(t0);
    assert!(streamer.on_channel_closed(streamer.session(), t0));
    assert!(streamer.decision_pending());

    let reopened = t0 + Duration::from_secs(3);
    let session = streamer.reconnect_due(reopened).unwrap();
    assert!(streamer.on_channel_open(session, reopened));
    assert_eq!(streamer.state(), StreamState::Paused);
    assert!(streamer.tick(reopened + Duration::from_millis(500)).is_none());

    assert!(streamer.resolve_decision(Decision::Retry, reopened));
    assert_eq!(streamer.state(), StreamState::Streaming);
    assert!(streamer.tick(reopened).is_some());
  }

  #[test]
  fn decision_made_while_disconnected_applies_on_reopen() {
    let t0 = Instant::now();
    let mut streamer = escalated(t0);
    streamer.on_channel_closed(streamer.session(), t0);

    assert!(streamer.resolve_decision(Decision::Abort, t0));
    assert!(!streamer.decision_pending());
    assert!(!streamer.resolve_decision(Decision::Retry, t0));

    let reopened = t0 + Duration::from_secs(3);
    let session = streamer.reconnect_due(reopened).unwrap();
    assert!(streamer.on_channel_open(session, reopened));
    assert_eq!(streamer.state(), StreamState::Connected);
    assert!(streamer.tick(reopened).is_none());
  }

  #[test]
  fn ordered_channel_skips_the_late_reply_of_a_timed_out_frame() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    streamer.set_ordered_replies(true);
    let session = send_one(&mut streamer, t0);

    let timed_out = t0 + Duration::from_secs(2);
    assert_eq!(streamer.check_timeout(timed_out), FailureOutcome::Counted);
    assert_eq!(streamer.stale_replies(), 1);
    // 迟到的应答到来之前不发新帧
    assert!(streamer.tick(t0 + Duration::from_millis(2100)).is_none());

    assert_eq!(
      streamer.on_response(session, reply(800, 450)),
      ResponseOutcome::Discarded
    );
    assert_eq!(streamer.stale_replies(), 0);
    assert_eq!(streamer.stats().responses, 0);
    assert_eq!(streamer.stats().consecutive_errors, 1);

    let resumed = t0 + Duration::from_millis(2200);
    let session = send_one(&mut streamer, resumed);
    match streamer.on_response(session, reply(640, 360)) {
      ResponseOutcome::Updated(state) => assert_eq!(state.frame_size, Size::new(640, 360)),
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(streamer.stats().error_count, 1);
    assert_eq!(streamer.stats().consecutive_errors, 0);
  }

  #[test]
  fn unordered_channel_does_not_wait_for_late_replies() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    send_one(&mut streamer, t0);
    streamer.check_timeout(t0 + Duration::from_secs(2));
    assert_eq!(streamer.stale_replies(), 0);
    assert!(streamer.tick(t0 + Duration::from_millis(2100)).is_some());
  }

  #[test]
  fn stop_on_ordered_channel_leaves_a_stale_reply_that_expires() {
    let t0 = Instant::now();
    let mut streamer = streaming(t0);
    streamer.set_ordered_replies(true);
    send_one(&mut streamer, t0);

    assert!(streamer.stop());
    assert_eq!(streamer.stale_replies(), 1);
    assert!(streamer.start(Duration::from_millis(100), t0));
    assert!(streamer.tick(t0).is_none());

    let checked = t0 + Duration::from_millis(10);
    assert_eq!(streamer.check_timeout(checked), FailureOutcome::Ignored);
    assert!(!streamer.stale_replies_expired(checked + Duration::from_secs(1)));
    assert!(streamer.stale_replies_expired(checked + Duration::from_secs(2)));

    // 关闭通道后新会话从零开始
    streamer.on_channel_closed(streamer.session(), checked);
    assert_eq!(streamer.stale_replies(), 0);
    assert!(!streamer.stale_replies_expired(checked + Duration::from_secs(2)));
  }
}
