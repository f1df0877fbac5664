// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/analysis.rs - 图片/视频一次性分析客户端
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

use std::{path::Path, str::FromStr, time::Duration};

use reqwest::{
  blocking::{Client, Response, multipart::Form},
  header::CONTENT_TYPE,
};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  config::{self, ANALYZE_IMAGE_PATH, ANALYZE_VIDEO_PATH, ConfigError, RESET_TRACKING_PATH},
  model::analysis::AnalysisResult,
};

#[derive(Error, Debug)]
pub enum AnalysisError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("请求超时")]
  Timeout,
  #[error("网络错误: {0}")]
  TransportError(reqwest::Error),
  #[error("服务器错误 ({status}): {message}")]
  ServerError { status: u16, message: String },
  #[error("服务器返回了非 JSON 响应 ({status}, {content_type})")]
  NotJson { status: u16, content_type: String },
  #[error("响应解析失败: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("无法识别的媒体类型: {0}")]
  UnsupportedMedia(String),
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
}

impl From<reqwest::Error> for AnalysisError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      AnalysisError::Timeout
    } else {
      AnalysisError::TransportError(err)
    }
  }
}

impl AnalysisError {
  /// 服务器可达但给出了错误或无法解析的应答
  pub fn is_server_error(&self) -> bool {
    matches!(
      self,
      AnalysisError::ServerError { .. } | AnalysisError::NotJson { .. } | AnalysisError::Malformed(_)
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn from_path(path: &Path) -> Option<Self> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
      "jpg" | "jpeg" | "png" | "bmp" | "gif" | "webp" | "heic" => Some(MediaKind::Image),
      "mp4" | "mov" | "avi" | "mkv" | "m4v" | "3gp" | "webm" => Some(MediaKind::Video),
      _ => None,
    }
  }

  pub fn endpoint(&self) -> &'static str {
    match self {
      MediaKind::Image => ANALYZE_IMAGE_PATH,
      MediaKind::Video => ANALYZE_VIDEO_PATH,
    }
  }
}

impl FromStr for MediaKind {
  type Err = AnalysisError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "image" | "photo" => Ok(MediaKind::Image),
      "video" => Ok(MediaKind::Video),
      other => Err(AnalysisError::UnsupportedMedia(other.to_string())),
    }
  }
}

#[derive(Deserialize)]
struct ErrorBody {
  error: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerReply<T> {
  Failed(ErrorBody),
  Ok(T),
}

/// 校验状态码与 Content-Type 后再解析 JSON，解析失败不会 panic
pub fn decode_reply<T: DeserializeOwned>(
  status: u16,
  content_type: Option<&str>,
  body: &str,
) -> Result<T, AnalysisError> {
  let is_json = content_type
    .map(|ct| ct.to_ascii_lowercase().contains("json"))
    .unwrap_or(false);
  let success = (200..300).contains(&status);

  if !is_json {
    if success {
      return Err(AnalysisError::NotJson {
        status,
        content_type: content_type.unwrap_or("<none>").to_string(),
      });
    }
    return Err(AnalysisError::ServerError {
      status,
      message: body.chars().take(200).collect(),
    });
  }

  if !success {
    let message = serde_json::from_str::<ErrorBody>(body)
      .map(|b| b.error)
      .unwrap_or_else(|_| body.chars().take(200).collect());
    return Err(AnalysisError::ServerError { status, message });
  }

  Ok(serde_json::from_str(body)?)
}

pub fn read_reply<T: DeserializeOwned>(response: Response) -> Result<T, AnalysisError> {
  let status = response.status().as_u16();
  let content_type = response
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(String::from);
  let body = response.text()?;
  decode_reply(status, content_type.as_deref(), &body)
}

/// 一次性分析请求，`error` 字段视为本次调用失败
pub fn decode_analysis(
  status: u16,
  content_type: Option<&str>,
  body: &str,
) -> Result<AnalysisResult, AnalysisError> {
  match decode_reply::<ServerReply<AnalysisResult>>(status, content_type, body)? {
    ServerReply::Ok(result) => Ok(result),
    ServerReply::Failed(ErrorBody { error }) => Err(AnalysisError::ServerError {
      status,
      message: error,
    }),
  }
}

pub struct AnalysisClient {
  server: Url,
  client: Client,
}

impl AnalysisClient {
  pub fn new(server: Url, timeout: Duration) -> Result<Self, AnalysisError> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { server, client })
  }

  pub fn server(&self) -> &Url {
    &self.server
  }

  pub fn analyze(&self, path: &Path) -> Result<AnalysisResult, AnalysisError> {
    let kind = MediaKind::from_path(path)
      .ok_or_else(|| AnalysisError::UnsupportedMedia(path.display().to_string()))?;
    self.analyze_as(kind, path)
  }

  pub fn analyze_image(&self, path: &Path) -> Result<AnalysisResult, AnalysisError> {
    self.analyze_as(MediaKind::Image, path)
  }

  pub fn analyze_video(&self, path: &Path) -> Result<AnalysisResult, AnalysisError> {
    self.analyze_as(MediaKind::Video, path)
  }

  pub fn analyze_as(&self, kind: MediaKind, path: &Path) -> Result<AnalysisResult, AnalysisError> {
    let url = config::endpoint(&self.server, kind.endpoint())?;
    info!("上传 {} 到 {}", path.display(), url);

    let form = Form::new().file("file", path)?;
    let now = std::time::Instant::now();
    let response = self.client.post(url).multipart(form).send()?;
    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response.text()?;
    info!("服务器应答 {}，耗时: {:.2?}", status, now.elapsed());

    decode_analysis(status, content_type.as_deref(), &body).inspect_err(|e| {
      warn!("分析失败: {}", e);
    })
  }

  /// 清空服务器端的跟踪编号，新的实时会话开始前调用
  pub fn reset_tracking(&self) -> Result<(), AnalysisError> {
    reset_tracking(&self.client, &self.server)
  }
}

pub fn reset_tracking(client: &Client, server: &Url) -> Result<(), AnalysisError> {
  let url = config::endpoint(server, RESET_TRACKING_PATH)?;
  let response = client.post(url).send()?;
  let _: serde_json::Value = read_reply(response)?;
  info!("服务器跟踪编号已重置");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{StreamResponse, analysis::MediaType};

  const JSON: Option<&str> = Some("application/json");

  #[test]
  fn html_error_page_is_not_parsed_as_json() {
    let err = decode_reply::<StreamResponse>(502, Some("text/html"), "<html>Bad Gateway</html>")
      .unwrap_err();
    assert!(matches!(err, AnalysisError::ServerError { status: 502, .. }));
    assert!(err.is_server_error());

    let err = decode_reply::<StreamResponse>(200, Some("text/html"), "<html></html>").unwrap_err();
    assert!(matches!(err, AnalysisError::NotJson { status: 200, .. }));
  }

  #[test]
  fn server_error_message_is_surfaced() {
    let err = decode_reply::<StreamResponse>(400, JSON, r#"{"error": "No file part in the request"}"#)
      .unwrap_err();
    match err {
      AnalysisError::ServerError { status, message } => {
        assert_eq!(status, 400);
        assert_eq!(message, "No file part in the request");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn truncated_json_is_malformed_not_a_panic() {
    let err = decode_reply::<StreamResponse>(200, JSON, r#"{"detections": [{"box": [1,2"#).unwrap_err();
    assert!(matches!(err, AnalysisError::Malformed(_)));
  }

  #[test]
  fn analysis_error_field_fails_the_call() {
    let err = decode_analysis(200, JSON, r#"{"error": "Error: Could not read image"}"#).unwrap_err();
    assert!(matches!(err, AnalysisError::ServerError { status: 200, .. }));
  }

  #[test]
  fn analysis_success_decodes() {
    let body = r#"{"status": "success", "media_type": "image", "detected_pigs_count": 3,
                   "primary_behavior": "Eating", "details": {"Eating": 2, "Lying": 1}}"#;
    let result = decode_analysis(200, Some("application/json; charset=utf-8"), body).unwrap();
    assert_eq!(result.media_type, MediaType::Image);
    assert_eq!(result.pig_count(), 3);
  }

  #[test]
  fn media_kind_from_extension() {
    assert_eq!(
      MediaKind::from_path(Path::new("pen-3/IMG_0001.JPG")),
      Some(MediaKind::Image)
    );
    assert_eq!(
      MediaKind::from_path(Path::new("clip.mov")),
      Some(MediaKind::Video)
    );
    assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
    assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
  }
}
