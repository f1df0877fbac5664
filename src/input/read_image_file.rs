// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/input/read_image_file.rs - 静态图片采集来源
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("路径编码错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 把一张图片当作摄像头
///
/// `image:///path/pen.jpg` 只产出一帧，`image:///path/pen.jpg?repeat`
/// 每次采集都返回同一张图，用于在没有摄像头时跑通推流循环。
pub struct ImageFileInput {
  image: Option<RgbImage>,
  repeat: bool,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path())?;
    let image = ImageReader::open(path.as_ref())?.decode()?.to_rgb8();
    let repeat = url.query_pairs().any(|(k, _)| k == "repeat");
    info!(
      "读取图片 {} ({}x{})，重复: {}",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(ImageFileInput::from_image(image, repeat))
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbImage, repeat: bool) -> Self {
    Self {
      image: Some(image),
      repeat,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if self.repeat {
      self.image.clone()
    } else {
      self.image.take()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_shot_yields_once() {
    let mut input = ImageFileInput::from_image(RgbImage::new(4, 3), false);
    assert!(input.next().is_some());
    assert!(input.next().is_none());
  }

  #[test]
  fn repeat_keeps_yielding() {
    let input = ImageFileInput::from_image(RgbImage::new(4, 3), true);
    assert_eq!(input.take(5).count(), 5);
  }

  #[test]
  fn loads_percent_encoded_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pen 3.png");
    RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]))
      .save(&path)
      .unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file://", "image://", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.dimensions(), (8, 6));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("gst://camera/dev/video0").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
