// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/transport.rs - 实时推流通道
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

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, analysis::AnalysisError, config::ConfigError, frame::EncodedFrame,
  model::StreamResponse,
};

mod http;
mod websocket;

pub use self::http::{HttpChannel, HttpConnector};
pub use self::websocket::{WebSocketChannel, WebSocketConnector};

#[derive(Error, Debug)]
pub enum ChannelError {
  #[error("WebSocket 错误: {0}")]
  WebSocketError(#[from] tungstenite::Error),
  #[error("HTTP 错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("服务器拒绝建立会话: {0}")]
  Rejected(#[from] AnalysisError),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("通道已关闭")]
  Closed,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 通道上收到的一条消息
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
  Nothing,
  Response(StreamResponse),
  /// 单帧失败，会话本身仍然可用
  FrameFailed(String),
}

/// 双工推流通道。一个通道对象只属于一次连接尝试
pub trait DuplexChannel {
  fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), ChannelError>;

  /// 最多等待 `timeout`，`Err` 表示整个通道不可用
  fn poll(&mut self, timeout: Duration) -> Result<Inbound, ChannelError>;

  /// 服务器是否按发送顺序逐帧应答。为 `true` 时，被放弃的帧的应答仍会到达
  fn replies_in_order(&self) -> bool {
    false
  }

  fn close(&mut self) {}
}

/// 每次调用都建立一个新的通道
pub trait ChannelConnector {
  type Channel: DuplexChannel;
  fn connect(&self) -> Result<Self::Channel, ChannelError>;
}

/// 解析一条文本应答，无法解析时按服务器错误处理
pub fn parse_reply(text: &str) -> Inbound {
  match serde_json::from_str::<StreamResponse>(text) {
    Ok(response) => Inbound::Response(response),
    Err(e) => Inbound::FrameFailed(format!("无法解析服务器响应: {}", e)),
  }
}

pub enum ConnectorWrapper {
  WebSocket(WebSocketConnector),
  Http(HttpConnector),
}

impl FromUrl for ConnectorWrapper {
  type Error = ChannelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      WebSocketConnector::SCHEME => Ok(ConnectorWrapper::WebSocket(
        WebSocketConnector::from_url(url)?,
      )),
      HttpConnector::SCHEME | "https" => Ok(ConnectorWrapper::Http(HttpConnector::from_url(url)?)),
      _ => Err(ChannelError::SchemeMismatch),
    }
  }
}

pub enum ChannelWrapper {
  WebSocket(Box<WebSocketChannel>),
  Http(HttpChannel),
}

impl ChannelConnector for ConnectorWrapper {
  type Channel = ChannelWrapper;

  fn connect(&self) -> Result<Self::Channel, ChannelError> {
    match self {
      ConnectorWrapper::WebSocket(connector) => {
        Ok(ChannelWrapper::WebSocket(Box::new(connector.connect()?)))
      }
      ConnectorWrapper::Http(connector) => Ok(ChannelWrapper::Http(connector.connect()?)),
    }
  }
}

impl DuplexChannel for ChannelWrapper {
  fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), ChannelError> {
    match self {
      ChannelWrapper::WebSocket(channel) => channel.send_frame(frame),
      ChannelWrapper::Http(channel) => channel.send_frame(frame),
    }
  }

  fn poll(&mut self, timeout: Duration) -> Result<Inbound, ChannelError> {
    match self {
      ChannelWrapper::WebSocket(channel) => channel.poll(timeout),
      ChannelWrapper::Http(channel) => channel.poll(timeout),
    }
  }

  fn replies_in_order(&self) -> bool {
    match self {
      ChannelWrapper::WebSocket(channel) => channel.replies_in_order(),
      ChannelWrapper::Http(channel) => channel.replies_in_order(),
    }
  }

  fn close(&mut self) {
    match self {
      ChannelWrapper::WebSocket(channel) => channel.close(),
      ChannelWrapper::Http(channel) => channel.close(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn garbage_reply_is_a_frame_failure() {
    assert!(matches!(
      parse_reply("Internal Server Error"),
      Inbound::FrameFailed(_)
    ));
    match parse_reply(r#"{"detections": [], "frame_width": 640, "frame_height": 360}"#) {
      Inbound::Response(response) => assert_eq!(response.frame_width, Some(640)),
      other => panic!("unexpected inbound: {other:?}"),
    }
  }

  #[test]
  fn connector_is_chosen_by_scheme() {
    let ws = Url::parse("ws://127.0.0.1:5000/ws/live-stream?max_pigs=5").unwrap();
    assert!(matches!(
      ConnectorWrapper::from_url(&ws),
      Ok(ConnectorWrapper::WebSocket(_))
    ));
    let http = Url::parse("http://127.0.0.1:5000/live-detect").unwrap();
    assert!(matches!(
      ConnectorWrapper::from_url(&http),
      Ok(ConnectorWrapper::Http(_))
    ));
    let rtsp = Url::parse("rtsp://127.0.0.1/stream").unwrap();
    assert!(matches!(
      ConnectorWrapper::from_url(&rtsp),
      Err(ChannelError::SchemeMismatch)
    ));
  }
}
