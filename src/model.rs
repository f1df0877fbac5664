// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/model.rs - 推理服务器返回的数据模型
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

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Size;

pub mod analysis;

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> Option<u32>;
}

/// 猪只行为标签
///
/// 服务器的分类集合是开放的，无法识别的标签保存在 `Other` 中，
/// 绘制时使用兜底颜色。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Behavior {
  Drinking,
  Eating,
  Investigating,
  Lying,
  Mounted,
  Sleeping,
  Walking,
  Other(String),
}

impl Behavior {
  /// 与服务器分类器输出顺序一致
  pub const KNOWN: [Behavior; 7] = [
    Behavior::Drinking,
    Behavior::Eating,
    Behavior::Investigating,
    Behavior::Lying,
    Behavior::Mounted,
    Behavior::Sleeping,
    Behavior::Walking,
  ];

  pub fn from_label(label: &str) -> Self {
    match label.trim().to_ascii_lowercase().as_str() {
      "drinking" => Behavior::Drinking,
      "eating" => Behavior::Eating,
      "investigating" => Behavior::Investigating,
      "lying" => Behavior::Lying,
      // 服务器的类别文件里拼成了 Moutend
      "mounted" | "moutend" => Behavior::Mounted,
      "sleeping" => Behavior::Sleeping,
      "walking" => Behavior::Walking,
      _ => Behavior::Other(label.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Behavior::Drinking => "Drinking",
      Behavior::Eating => "Eating",
      Behavior::Investigating => "Investigating",
      Behavior::Lying => "Lying",
      Behavior::Mounted => "Mounted",
      Behavior::Sleeping => "Sleeping",
      Behavior::Walking => "Walking",
      Behavior::Other(label) => label,
    }
  }

  pub fn is_resting(&self) -> bool {
    matches!(self, Behavior::Lying | Behavior::Sleeping)
  }

  pub fn is_known(&self) -> bool {
    !matches!(self, Behavior::Other(_))
  }
}

impl From<String> for Behavior {
  fn from(label: String) -> Self {
    Behavior::from_label(&label)
  }
}

impl From<Behavior> for String {
  fn from(behavior: Behavior) -> Self {
    behavior.as_str().to_string()
  }
}

impl fmt::Display for Behavior {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl WithLabel for Behavior {
  fn to_label_str(&self) -> String {
    self.as_str().to_string()
  }

  fn to_label_id(&self) -> Option<u32> {
    Behavior::KNOWN
      .iter()
      .position(|known| known == self)
      .map(|idx| idx as u32)
  }
}

/// 单帧中单只猪的检测结果，坐标位于发送帧的像素空间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "box")]
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub behavior: Behavior,
  #[serde(default)]
  pub confidence: f32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pig_id: Option<u32>,
}

impl Detection {
  /// 服务器用 0 表示本帧未启用跟踪
  pub fn tracked_id(&self) -> Option<u32> {
    self.pig_id.filter(|id| *id != 0)
  }
}

/// 实时推流时服务器对单帧的响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
  #[serde(default)]
  pub detections: Vec<Detection>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub frame_width: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub frame_height: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fps: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_tracked_pigs: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub frame_count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub processing_time_ms: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StreamResponse {
  /// 服务器实际处理的帧尺寸，缺失或为零时返回 `None`
  pub fn frame_size(&self) -> Option<Size> {
    match (self.frame_width, self.frame_height) {
      (Some(width), Some(height)) if width > 0 && height > 0 => Some(Size::new(width, height)),
      _ => None,
    }
  }
}
