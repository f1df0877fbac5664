// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 摄像头与视频文件采集
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

//! # GStreamer 采集
//!
//! 支持两种地址：
//!
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30&rotate=180`
//! - `gst://file/path/to/pen.mp4`
//!
//! appsink 只保留最新的两帧并丢弃旧帧，推流循环每次采集拿到的都是最近的画面。
//! 采集到的帧保持摄像头原始分辨率，缩放交给编码环节。
//!
//! 使用前需要安装 GStreamer 开发库，并在构建时启用 `gstreamer_input` 特性。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的 GStreamer 来源: {0}")]
  UnknownSource(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 读取视频信息")]
  VideoInfoError,
  #[error("不支持的像素格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 需要 {expected} 字节，实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CAMERA_FPS: u32 = 15;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location={} ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat => String::from("videoconvert ! video/x-raw,format=RGB"),
    }
  }
}

pub struct GStreamerInputPipelineBuilder {
  items: Vec<PipelineItem>,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl GStreamerInputPipelineBuilder {
  fn camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = vec![PipelineItem::CameraSource {
      camera: path.to_string(),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| String::from("YUY2")),
      width: parse("width", DEFAULT_CAMERA_WIDTH),
      height: parse("height", DEFAULT_CAMERA_HEIGHT),
      fps: parse("fps", DEFAULT_CAMERA_FPS),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    Self { items }
  }

  fn file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![PipelineItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    Self { items }
  }

  fn video_flip(rotate: Option<&str>) -> Option<PipelineItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(PipelineItem::VideoFlip { method })
  }

  pub fn description(&self) -> String {
    let body = self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<_>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 drop=true name=sink", body)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 采集管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError(String::from("无法创建管道")))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::camera_pipeline(url.path(), &query),
      Some("file") => Self::file_pipeline(url.path(), &query),
      other => {
        return Err(GStreamerInputError::UnknownSource(
          other.unwrap_or_default().to_string(),
        ));
      }
    };
    builder.items.push(PipelineItem::TargetFormat);

    Ok(builder)
  }
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    // 文件读完或者摄像头断开时 pull_sample 返回错误，迭代结束
    let sample = self
      .appsink
      .pull_sample()
      .map_err(|e| info!("GStreamer 采集结束: {}", e))
      .ok()?;
    sample_to_image(&sample)
      .map_err(|e| error!("转换采样失败: {}", e))
      .ok()
  }
}

fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError(String::from("采样中没有缓冲区")))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError(String::from("采样中没有 caps")))?;

  let info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = info.width() as usize;
  let height = info.height() as usize;
  let stride = info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let row = width * 3;
  let expected = stride * height.saturating_sub(1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 行尾可能有对齐填充，按行拷贝
  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    let start = y * stride;
    pixels.extend_from_slice(&data[start..start + row]);
  }

  RgbImage::from_raw(info.width(), info.height(), pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_url_builds_v4l2_pipeline() {
    let url = Url::parse("gst://camera/dev/video0?width=640&height=480&fps=30&rotate=180").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.description(),
      "v4l2src device=/dev/video0 ! video/x-raw,format=YUY2,width=640,height=480,framerate=30/1 \
       ! videoflip method=2 ! videoconvert ! video/x-raw,format=RGB \
       ! appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn file_url_builds_decode_pipeline() {
    let url = Url::parse("gst://file/data/pen.mp4").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert!(
      builder
        .description()
        .starts_with("filesrc location=/data/pen.mp4 ! decodebin ! videoconvert")
    );
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::UnknownSource(_))
    ));
  }
}
