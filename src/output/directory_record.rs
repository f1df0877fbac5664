// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/output/directory_record.rs - 按日期归档的叠加画面
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::Size,
  output::{
    Render,
    draw::{Draw, DrawError, Record, fit_display, parse_display},
  },
  streamer::RenderableState,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("绘制配置错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("路径编码错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &RgbImage,
    state: &RenderableState,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_state(frame, state).save(path)?;
      }
      DrawWrapper::Record(record) => {
        let image = fit_display(frame, record.display);
        image.save(path)?;
        record.record(state, Size::new(image.width(), image.height()), path)?;
      }
    };

    Ok(())
  }
}

/// `folder:///var/lib/bantai?record=name&always`
///
/// 默认只保存有检测结果的帧；`record` 时保存原图和文本记录而不是叠加画面。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v != "id");

    let draw = match record {
      Some(label_with_name) => {
        let display = uri
          .query_pairs()
          .find(|(k, _)| k == "display")
          .map(|(_, v)| parse_display(&v))
          .transpose()?;
        DrawWrapper::Record(Record {
          label_with_name,
          display,
        })
      }
      None => DrawWrapper::Draw(Box::new(Draw::from_query(uri)?)),
    };

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput::new(
      PathBuf::from(urlencoding::decode(uri.path())?.as_ref()),
      draw,
      always,
    ))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: DrawWrapper, always: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<RgbImage, RenderableState> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &RenderableState) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(Local::now())?;
    self.draw.save_result(&path, frame, result)?;
    debug!("已归档: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Behavior, Detection};

  fn state(detections: Vec<Detection>) -> RenderableState {
    RenderableState {
      detections,
      frame_size: Size::new(32, 18),
      fps: None,
      total_tracked_pigs: Some(1),
      processing_time_ms: None,
      frame_count: None,
      error_count: 0,
    }
  }

  fn files_with_extension(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          found.push(path);
        }
      }
    }
    found
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbImage::new(32, 18);

    let output = DirectoryRecordOutput::new(dir.path(), DrawWrapper::Draw(Box::default()), false);
    output.render_result(&frame, &state(Vec::new())).unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    let output = DirectoryRecordOutput::new(dir.path(), DrawWrapper::Draw(Box::default()), true);
    output.render_result(&frame, &state(Vec::new())).unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
  }

  #[test]
  fn record_mode_writes_text_next_to_image() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record=name", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let detection = Detection {
      bbox: [1.0, 2.0, 10.0, 12.0],
      behavior: Behavior::Drinking,
      confidence: 0.5,
      pig_id: Some(4),
    };
    output
      .render_result(&RgbImage::new(32, 18), &state(vec![detection]))
      .unwrap();

    let records = files_with_extension(dir.path(), "txt");
    assert_eq!(records.len(), 1);
    let text = std::fs::read_to_string(&records[0]).unwrap();
    assert_eq!(text, "Drinking, 0.5000, 4, 1.0, 2.0, 10.0, 12.0");
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = url::Url::parse("image:///tmp/latest.png").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::SchemeMismatch)
    ));
  }
}
