// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/geometry.rs - 帧空间到显示空间的坐标映射
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

use crate::model::{Behavior, Detection};

/// 像素尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
  pub width: u32,
  pub height: u32,
}

impl Size {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }
}

impl std::fmt::Display for Size {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

/// 轴对齐矩形 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl Rect {
  pub fn from_xyxy(bbox: &[f32; 4]) -> Self {
    Self {
      x1: bbox[0],
      y1: bbox[1],
      x2: bbox[2],
      y2: bbox[3],
    }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn scale(&self, sx: f32, sy: f32) -> Self {
    Self {
      x1: self.x1 * sx,
      y1: self.y1 * sy,
      x2: self.x2 * sx,
      y2: self.y2 * sy,
    }
  }
}

/// 映射到显示空间后的检测框
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayBox {
  pub rect: Rect,
  /// 标签锚点，位于框的左上角
  pub label_anchor: Point,
  pub behavior: Behavior,
  pub confidence: f32,
  pub pig_id: Option<u32>,
}

/// 帧空间到显示空间的缩放系数，帧尺寸为零时无意义
pub fn scale_factors(frame: Size, display: Size) -> Option<(f32, f32)> {
  if frame.is_empty() {
    return None;
  }
  Some((
    display.width as f32 / frame.width as f32,
    display.height as f32 / frame.height as f32,
  ))
}

/// 把检测框从服务器处理的帧空间映射到显示空间
///
/// `frame` 必须取自与检测结果同一个响应，每个响应都要重新计算。
pub fn map_to_display(detection: &Detection, frame: Size, display: Size) -> Option<DisplayBox> {
  let (sx, sy) = scale_factors(frame, display)?;
  let rect = Rect::from_xyxy(&detection.bbox).scale(sx, sy);
  Some(DisplayBox {
    label_anchor: Point {
      x: rect.x1,
      y: rect.y1,
    },
    rect,
    behavior: detection.behavior.clone(),
    confidence: detection.confidence,
    pig_id: detection.tracked_id(),
  })
}
