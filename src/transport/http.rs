// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/transport/http.rs - 逐帧 HTTP 上传通道
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

//! 每一帧都是一次独立的 `POST /live-detect`。请求在短生命周期的工作线程中执行，
//! 结果经 `mpsc` 交回推流循环；同一时刻最多只有一个工作线程的结果会被接收。

use std::{
  sync::mpsc::{self, Receiver, RecvTimeoutError},
  thread,
  time::Duration,
};

use reqwest::blocking::{
  Client,
  multipart::{Form, Part},
};
use tracing::{debug, info};
use url::Url;

use super::{ChannelConnector, ChannelError, DuplexChannel, Inbound};
use crate::{
  FromUrl, FromUrlWithScheme,
  analysis::{self, AnalysisError},
  config::{self, DEFAULT_FRAME_TIMEOUT, LIVE_DETECT_PATH, strip_query},
  frame::EncodedFrame,
  model::StreamResponse,
};

pub struct HttpConnector {
  server: Url,
  live_url: Url,
  client: Client,
}

impl FromUrlWithScheme for HttpConnector {
  const SCHEME: &'static str = "http";
}

impl FromUrl for HttpConnector {
  type Error = ChannelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME && url.scheme() != "https" {
      return Err(ChannelError::SchemeMismatch);
    }

    let timeout = url
      .query_pairs()
      .find(|(k, _)| k == "timeout")
      .and_then(|(_, v)| v.parse::<u64>().ok())
      .map(Duration::from_millis)
      .unwrap_or(DEFAULT_FRAME_TIMEOUT);

    // 只给了服务器地址时补上默认接口
    let live_url = if url.path().is_empty() || url.path() == "/" {
      config::endpoint(url, LIVE_DETECT_PATH)?
    } else {
      strip_query(url)
    };

    Ok(HttpConnector {
      server: strip_query(url),
      live_url,
      client: Client::builder().timeout(timeout).build()?,
    })
  }
}

impl ChannelConnector for HttpConnector {
  type Channel = HttpChannel;

  fn connect(&self) -> Result<Self::Channel, ChannelError> {
    // 新会话从干净的跟踪编号开始，服务器不可达时视为连接失败
    analysis::reset_tracking(&self.client, &self.server)?;
    info!("HTTP 推流会话已建立: {}", self.live_url);

    Ok(HttpChannel {
      client: self.client.clone(),
      live_url: self.live_url.clone(),
      pending: None,
    })
  }
}

pub struct HttpChannel {
  client: Client,
  live_url: Url,
  pending: Option<Receiver<Inbound>>,
}

fn post_frame(client: &Client, url: Url, bytes: Vec<u8>) -> Inbound {
  let part = match Part::bytes(bytes)
    .file_name("frame.jpg")
    .mime_str("image/jpeg")
  {
    Ok(part) => part,
    Err(e) => return Inbound::FrameFailed(e.to_string()),
  };
  let form = Form::new().part("file", part);

  let result = client
    .post(url)
    .multipart(form)
    .send()
    .map_err(AnalysisError::from)
    .and_then(analysis::read_reply::<StreamResponse>);

  match result {
    Ok(response) => Inbound::Response(response),
    Err(e) => Inbound::FrameFailed(e.to_string()),
  }
}

impl DuplexChannel for HttpChannel {
  fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), ChannelError> {
    let (tx, rx) = mpsc::channel();
    let client = self.client.clone();
    let url = self.live_url.clone();
    let bytes = frame.as_bytes().to_vec();

    thread::Builder::new()
      .name("live-detect".into())
      .spawn(move || {
        let inbound = post_frame(&client, url, bytes);
        // 接收端已被替换说明这一帧已经按超时处理
        let _ = tx.send(inbound);
      })?;

    // 旧的接收端被丢弃，超时帧的迟到结果不会再被读到
    self.pending = Some(rx);
    debug!("已提交帧 {}x{}", frame.width(), frame.height());
    Ok(())
  }

  fn poll(&mut self, timeout: Duration) -> Result<Inbound, ChannelError> {
    let Some(rx) = self.pending.as_ref() else {
      thread::sleep(timeout);
      return Ok(Inbound::Nothing);
    };

    match rx.recv_timeout(timeout) {
      Ok(inbound) => {
        self.pending = None;
        Ok(inbound)
      }
      Err(RecvTimeoutError::Timeout) => Ok(Inbound::Nothing),
      Err(RecvTimeoutError::Disconnected) => {
        self.pending = None;
        Ok(Inbound::FrameFailed(String::from("上传线程意外退出")))
      }
    }
  }

  fn close(&mut self) {
    self.pending = None;
  }
}
