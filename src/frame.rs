// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/frame.rs - 采集帧的缩放与编码
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

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{
  RgbImage,
  codecs::jpeg::JpegEncoder,
  imageops::{self, FilterType},
};
use thiserror::Error;

use crate::geometry::Size;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("采集帧为空")]
  EmptyFrame,
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 已缩放并压缩、可直接发送的帧
///
/// 宽高是缩放之后的尺寸。
#[derive(Debug, Clone)]
pub struct EncodedFrame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
}

impl EncodedFrame {
  pub fn size(&self) -> Size {
    Size::new(self.width, self.height)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn to_base64(&self) -> String {
    STANDARD.encode(&self.data)
  }
}

/// 按目标宽度等比缩放后的尺寸，高度由宽高比推导，不放大
pub fn target_size(source: Size, target_width: u32) -> Size {
  if source.width <= target_width || target_width == 0 {
    return source;
  }
  let height = (source.height as u64 * target_width as u64 + source.width as u64 / 2)
    / source.width as u64;
  Size::new(target_width, (height as u32).max(1))
}

/// 缩放到目标宽度并压缩为 JPEG
pub fn encode_frame(
  raw: &RgbImage,
  target_width: u32,
  quality: u8,
) -> Result<EncodedFrame, EncodeError> {
  let source = Size::new(raw.width(), raw.height());
  if source.is_empty() {
    return Err(EncodeError::EmptyFrame);
  }

  let target = target_size(source, target_width);
  let mut buffer = Cursor::new(Vec::new());
  {
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    if target == source {
      encoder.encode_image(raw)?;
    } else {
      let resized = imageops::resize(raw, target.width, target.height, FilterType::Triangle);
      encoder.encode_image(&resized)?;
    }
  }

  Ok(EncodedFrame {
    data: buffer.into_inner().into_boxed_slice(),
    width: target.width,
    height: target.height,
  })
}
