// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/transport/websocket.rs - WebSocket 推流通道
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

use std::{io::ErrorKind, net::TcpStream, time::Duration};

use serde::Serialize;
use tracing::{debug, info, warn};
use tungstenite::{Message, WebSocket, stream::MaybeTlsStream};
use url::Url;

use super::{ChannelConnector, ChannelError, DuplexChannel, Inbound, parse_reply};
use crate::{
  FromUrl, FromUrlWithScheme,
  config::{DEFAULT_MAX_PIGS, strip_query},
  frame::EncodedFrame,
};

#[derive(Serialize)]
struct FrameMessage<'a> {
  frame: &'a str,
  max_pigs: u32,
}

pub struct WebSocketConnector {
  url: Url,
  max_pigs: u32,
}

impl FromUrlWithScheme for WebSocketConnector {
  const SCHEME: &'static str = "ws";
}

impl FromUrl for WebSocketConnector {
  type Error = ChannelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ChannelError::SchemeMismatch);
    }

    let max_pigs = url
      .query_pairs()
      .find(|(k, _)| k == "max_pigs")
      .and_then(|(_, v)| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_MAX_PIGS);

    Ok(WebSocketConnector {
      url: strip_query(url),
      max_pigs,
    })
  }
}

impl ChannelConnector for WebSocketConnector {
  type Channel = WebSocketChannel;

  fn connect(&self) -> Result<Self::Channel, ChannelError> {
    info!("连接 WebSocket: {}", self.url);
    let (socket, response) = tungstenite::connect(self.url.as_str())?;
    info!("WebSocket 已连接，握手状态: {}", response.status());

    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
      stream.set_nodelay(true)?;
    }

    Ok(WebSocketChannel {
      socket,
      max_pigs: self.max_pigs,
    })
  }
}

pub struct WebSocketChannel {
  socket: WebSocket<MaybeTlsStream<TcpStream>>,
  max_pigs: u32,
}

impl WebSocketChannel {
  fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ChannelError> {
    // 超时为零会被系统拒绝
    let timeout = timeout.max(Duration::from_millis(1));
    if let MaybeTlsStream::Plain(stream) = self.socket.get_mut() {
      stream.set_read_timeout(Some(timeout))?;
    }
    Ok(())
  }
}

fn map_ws_error(err: tungstenite::Error) -> ChannelError {
  match err {
    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => ChannelError::Closed,
    other => ChannelError::WebSocketError(other),
  }
}

impl DuplexChannel for WebSocketChannel {
  fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), ChannelError> {
    let encoded = frame.to_base64();
    let payload = serde_json::to_string(&FrameMessage {
      frame: &encoded,
      max_pigs: self.max_pigs,
    })?;
    debug!(
      "发送帧 {}x{}，{} 字节",
      frame.width(),
      frame.height(),
      payload.len()
    );
    self
      .socket
      .send(Message::Text(payload))
      .map_err(map_ws_error)
  }

  fn poll(&mut self, timeout: Duration) -> Result<Inbound, ChannelError> {
    self.set_read_timeout(timeout)?;
    match self.socket.read() {
      Ok(Message::Text(text)) => Ok(parse_reply(&text)),
      Ok(Message::Binary(bytes)) => Ok(match std::str::from_utf8(&bytes) {
        Ok(text) => parse_reply(text),
        Err(_) => Inbound::FrameFailed(String::from("服务器返回了非文本消息")),
      }),
      Ok(Message::Close(frame)) => {
        info!("服务器关闭了 WebSocket: {:?}", frame);
        Err(ChannelError::Closed)
      }
      Ok(_) => Ok(Inbound::Nothing),
      Err(tungstenite::Error::Io(e))
        if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
      {
        Ok(Inbound::Nothing)
      }
      Err(e) => Err(map_ws_error(e)),
    }
  }

  /// 服务器对每条消息按序回一条应答
  fn replies_in_order(&self) -> bool {
    true
  }

  fn close(&mut self) {
    if let Err(e) = self.socket.close(None) {
      warn!("关闭 WebSocket 失败: {}", e);
    }
    // 尽量把关闭帧发出去
    if let Err(e) = self.socket.flush() {
      warn!("发送 WebSocket 关闭帧失败: {}", e);
    }
  }
}
