// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/model/analysis.rs - 图片/视频一次性分析结果
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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Behavior;

/// 服务器在没有检测到任何猪只时给出的主要行为
pub const NO_PIG_DETECTED: &str = "No Pig Detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
  Image,
  Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  pub media_type: MediaType,
  pub primary_behavior: String,
  /// 各行为的检测次数
  #[serde(default)]
  pub details: BTreeMap<String, u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detected_pigs_count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_unique_pigs: Option<u64>,
  #[serde(default)]
  pub pig_summaries: Vec<PigSummary>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lethargy_flags: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limping_flags: Option<u64>,
  #[serde(default)]
  pub time_series: Vec<TimeSeriesRecord>,
}

impl AnalysisResult {
  pub fn has_pigs(&self) -> bool {
    self.primary_behavior != NO_PIG_DETECTED && self.pig_count() > 0
  }

  /// 图片给出检测数，视频给出跟踪到的不同个体数
  pub fn pig_count(&self) -> u64 {
    self
      .detected_pigs_count
      .or(self.total_unique_pigs)
      .unwrap_or_else(|| self.details.values().sum())
  }

  pub fn primary(&self) -> Option<Behavior> {
    if self.primary_behavior == NO_PIG_DETECTED {
      None
    } else {
      Some(Behavior::from_label(&self.primary_behavior))
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PigSummary {
  pub pig_id: u32,
  pub predominant_behavior: Behavior,
  #[serde(default)]
  pub behavior_counts: BTreeMap<String, u64>,
  #[serde(default)]
  pub is_lethargic: bool,
  #[serde(default)]
  pub is_limping: bool,
}

/// 视频中一个时间片（服务器按 2 秒切分）的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
  pub time: String,
  #[serde(default)]
  pub pig_count: u64,
  #[serde(default)]
  pub behavior_breakdown: BTreeMap<String, BehaviorBucket>,
  #[serde(default)]
  pub lethargy: bool,
  #[serde(default)]
  pub lethargic_ids: Vec<u32>,
  #[serde(default)]
  pub limping: bool,
  #[serde(default)]
  pub limping_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorBucket {
  pub count: u64,
  #[serde(default)]
  pub pig_ids: Vec<u32>,
}
