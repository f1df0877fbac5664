// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/output/draw.rs - 行为检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  geometry::{DisplayBox, Point, Size},
  model::{Behavior, WithLabel},
  streamer::RenderableState,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

/// 未知行为的兜底颜色
pub const FALLBACK_COLOR: [u8; 3] = [160, 160, 160];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("无效的显示尺寸: {0}")]
  InvalidDisplay(String),
}

/// 每种行为一个固定颜色，服务器新增的类别统一用灰色
pub fn behavior_color(behavior: &Behavior) -> [u8; 3] {
  match behavior {
    Behavior::Drinking => [0, 128, 255],
    Behavior::Eating => [46, 204, 64],
    Behavior::Investigating => [255, 165, 0],
    Behavior::Lying => [128, 0, 128],
    Behavior::Mounted => [255, 0, 0],
    Behavior::Sleeping => [0, 0, 139],
    Behavior::Walking => [255, 220, 0],
    Behavior::Other(_) => FALLBACK_COLOR,
  }
}

/// `#3 Eating 93%`，未跟踪的猪不显示编号
pub fn label_text(display_box: &DisplayBox) -> String {
  let confidence = (display_box.confidence * 100.0).round() as i32;
  match display_box.pig_id {
    Some(id) => format!("#{} {} {}%", id, display_box.behavior, confidence),
    None => format!("{} {}%", display_box.behavior, confidence),
  }
}

/// 解析 `display=1280x720`
pub fn parse_display(value: &str) -> Result<Size, DrawError> {
  let (w, h) = value
    .split_once(['x', 'X'])
    .ok_or_else(|| DrawError::InvalidDisplay(value.to_string()))?;
  let size = match (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
    (Ok(w), Ok(h)) => Size::new(w, h),
    _ => return Err(DrawError::InvalidDisplay(value.to_string())),
  };
  if size.is_empty() {
    return Err(DrawError::InvalidDisplay(value.to_string()));
  }
  Ok(size)
}

/// 把原始采集帧缩放到显示尺寸，未指定时保持原尺寸
pub fn fit_display(frame: &RgbImage, display: Option<Size>) -> RgbImage {
  match display {
    Some(size) if size != Size::new(frame.width(), frame.height()) => {
      imageops::resize(frame, size.width, size.height, imageops::FilterType::Triangle)
    }
    _ => frame.clone(),
  }
}

fn display_from_query(url: &Url) -> Result<Option<Size>, DrawError> {
  url
    .query_pairs()
    .find(|(k, _)| k == "display")
    .map(|(_, v)| parse_display(&v))
    .transpose()
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
  display: Option<Size>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      display: None,
    }
  }
}

impl Draw {
  /// 从输出地址的查询参数读取 `font=/path/to/font.ttf` 与 `display=WxH`
  pub fn from_query(url: &Url) -> Result<Self, DrawError> {
    let mut draw = Draw::default().with_display(display_from_query(url)?);
    if let Some((_, path)) = url.query_pairs().find(|(k, _)| k == "font") {
      draw = draw.with_font_file(path.as_ref())?;
    }
    Ok(draw)
  }

  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    self.font = Some(FontVec::try_from_vec(data)?);
    info!("已加载标签字体: {}", path.as_ref().display());
    Ok(self)
  }

  pub fn with_display(mut self, display: Option<Size>) -> Self {
    self.display = display;
    self
  }

  pub fn display(&self) -> Option<Size> {
    self.display
  }

  /// 在显示帧上叠加检测框，返回新的图像
  pub fn draw_state(&self, frame: &RgbImage, state: &RenderableState) -> RgbImage {
    let mut image = fit_display(frame, self.display);
    let display = Size::new(image.width(), image.height());
    for display_box in state.display_boxes(display) {
      self.draw_box_with_label(&mut image, &display_box);
    }
    image
  }

  fn draw_box_with_label(&self, image: &mut RgbImage, display_box: &DisplayBox) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let rect = display_box.rect;
    let x_min = (rect.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (rect.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (rect.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (rect.y2.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(behavior_color(&display_box.behavior));
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let outline =
        imageproc::rect::Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, outline, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = label_text(display_box);
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let (label_x, label_y) = label_origin(display_box.label_anchor, self.label_text_height, w, h);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = self.label_text_height as u32;

    if label_width > 0 {
      let background = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, background, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

/// 标签背景的左上角：位于锚点正上方，超出画面时收回到画面内
pub fn label_origin(anchor: Point, text_height: i32, width: i32, height: i32) -> (i32, i32) {
  let x = (anchor.x.floor() as i32).clamp(0, (width - 1).max(0));
  let y = (anchor.y.floor() as i32 - text_height).clamp(0, (height - text_height).max(0));
  (x, y)
}

/// 不绘制，只把检测结果写成与图片同名的 `.txt`
pub struct Record {
  pub label_with_name: bool,
  pub display: Option<Size>,
}

impl Record {
  pub fn lines(&self, state: &RenderableState, display: Size) -> Vec<String> {
    state
      .display_boxes(display)
      .iter()
      .map(|b| {
        let name = if self.label_with_name {
          b.behavior.to_label_str()
        } else {
          b.behavior
            .to_label_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| String::from("-1"))
        };
        format!(
          "{}, {:.4}, {}, {:.1}, {:.1}, {:.1}, {:.1}",
          name,
          b.confidence,
          b.pig_id.unwrap_or(0),
          b.rect.x1,
          b.rect.y1,
          b.rect.x2,
          b.rect.y2
        )
      })
      .collect()
  }

  pub fn record(
    &self,
    state: &RenderableState,
    display: Size,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(state, display).join("\n"))
  }
}
