// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/config.rs - 服务器地址与推流参数配置
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

//! 推理服务器地址是编译期常量，命令行与环境变量只做覆盖。
//!
//! 推流参数沿用 URL 查询串的写法，例如：
//!
//! ```text
//! ws://192.168.1.10:5000/ws/live-stream?interval=300&max_pigs=10&width=640
//! ```

use std::{str::FromStr, time::Duration};

use thiserror::Error;
use url::Url;

use crate::FromUrl;

/// 一次性分析接口所在的服务器
pub const DEFAULT_SERVER: &str = "http://192.168.1.10:5000";
/// 实时推流默认走 WebSocket 通道
pub const DEFAULT_STREAM_URL: &str = "ws://192.168.1.10:5000/ws/live-stream";

pub const ANALYZE_IMAGE_PATH: &str = "/analyze-image";
pub const ANALYZE_VIDEO_PATH: &str = "/analyze-video";
pub const LIVE_DETECT_PATH: &str = "/live-detect";
pub const RESET_TRACKING_PATH: &str = "/reset-tracking";

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TARGET_WIDTH: u32 = 640;
pub const DEFAULT_JPEG_QUALITY: u8 = 70;
pub const DEFAULT_MAX_PIGS: u32 = 20;
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(3);
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URL 解析错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
}

/// 实时推流参数
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerConfig {
  /// 采集定时器周期
  pub interval: Duration,
  /// 发送前缩放到的宽度，高度按比例推导
  pub target_width: u32,
  /// JPEG 压缩质量 (1 - 100)
  pub jpeg_quality: u8,
  /// 服务器单帧最多返回的猪只数量
  pub max_pigs: u32,
  /// 单帧等待响应的超时
  pub frame_timeout: Duration,
  /// 通道断开后重连前的固定等待
  pub reconnect_backoff: Duration,
  /// 连续失败多少次后暂停并等待用户决定
  pub error_threshold: u32,
}

impl Default for StreamerConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_INTERVAL,
      target_width: DEFAULT_TARGET_WIDTH,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      max_pigs: DEFAULT_MAX_PIGS,
      frame_timeout: DEFAULT_FRAME_TIMEOUT,
      reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
      error_threshold: DEFAULT_ERROR_THRESHOLD,
    }
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

fn parse_positive_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
  match parse_value::<u64>(key, value)? {
    0 => Err(ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }),
    ms => Ok(Duration::from_millis(ms)),
  }
}

impl StreamerConfig {
  /// 用 URL 查询串覆盖默认值，未知的键会被忽略
  pub fn with_query(mut self, url: &Url) -> Result<Self, ConfigError> {
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "interval" => self.interval = parse_positive_millis(&key, &value)?,
        "timeout" => self.frame_timeout = parse_positive_millis(&key, &value)?,
        "backoff" => self.reconnect_backoff = Duration::from_millis(parse_value(&key, &value)?),
        "width" => {
          self.target_width = match parse_value::<u32>(&key, &value)? {
            0 => {
              return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
              });
            }
            width => width,
          }
        }
        "quality" => {
          self.jpeg_quality = match parse_value::<u8>(&key, &value)? {
            q @ 1..=100 => q,
            _ => {
              return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
              });
            }
          }
        }
        "max_pigs" => self.max_pigs = parse_value(&key, &value)?,
        "errors" => {
          self.error_threshold = parse_value::<u32>(&key, &value)?.max(1);
        }
        _ => {}
      }
    }
    Ok(self)
  }
}

impl FromUrl for StreamerConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    StreamerConfig::default().with_query(url)
  }
}

/// 拼接服务器上的接口地址，丢弃原地址上的查询串
pub fn endpoint(server: &Url, path: &str) -> Result<Url, ConfigError> {
  let mut url = server.join(path)?;
  url.set_query(None);
  Ok(url)
}

/// 去掉查询串，得到真正要连接的地址
pub fn strip_query(url: &Url) -> Url {
  let mut url = url.clone();
  url.set_query(None);
  url.set_fragment(None);
  url
}
