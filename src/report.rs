// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/report.rs - 分析结果的文本报告
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

use std::{collections::BTreeMap, fmt};

use crate::model::analysis::{AnalysisResult, MediaType};

/// 单个行为在全部检测中的占比
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorShare {
  pub label: String,
  pub count: u64,
  pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
  Lethargy,
  Limping,
}

impl fmt::Display for AlertKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AlertKind::Lethargy => f.write_str("嗜睡"),
      AlertKind::Limping => f.write_str("跛行"),
    }
  }
}

/// 某只猪的告警，以及它在哪些时间片被标记
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
  pub kind: AlertKind,
  pub pig_id: u32,
  pub times: Vec<String>,
}

pub struct Report<'a> {
  result: &'a AnalysisResult,
}

impl<'a> Report<'a> {
  pub fn new(result: &'a AnalysisResult) -> Self {
    Self { result }
  }

  /// 按次数降序，次数相同按标签排序；零次的行为不列出
  pub fn breakdown(&self) -> Vec<BehaviorShare> {
    let total: u64 = self.result.details.values().sum();
    if total == 0 {
      return Vec::new();
    }

    let mut shares: Vec<BehaviorShare> = self
      .result
      .details
      .iter()
      .filter(|(_, count)| **count > 0)
      .map(|(label, count)| BehaviorShare {
        label: label.clone(),
        count: *count,
        percent: *count as f64 * 100.0 / total as f64,
      })
      .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    shares
  }

  /// 汇总个体告警；时间片里出现但汇总中缺失的个体同样列出
  pub fn alerts(&self) -> Vec<Alert> {
    let mut alerts: BTreeMap<(u32, u8), Alert> = BTreeMap::new();

    let mut mark = |kind: AlertKind, pig_id: u32, time: Option<&str>| {
      let key = (pig_id, kind as u8);
      let alert = alerts.entry(key).or_insert_with(|| Alert {
        kind,
        pig_id,
        times: Vec::new(),
      });
      if let Some(time) = time {
        alert.times.push(time.to_string());
      }
    };

    for summary in &self.result.pig_summaries {
      if summary.is_lethargic {
        mark(AlertKind::Lethargy, summary.pig_id, None);
      }
      if summary.is_limping {
        mark(AlertKind::Limping, summary.pig_id, None);
      }
    }
    for record in &self.result.time_series {
      for id in &record.lethargic_ids {
        mark(AlertKind::Lethargy, *id, Some(&record.time));
      }
      for id in &record.limping_ids {
        mark(AlertKind::Limping, *id, Some(&record.time));
      }
    }

    alerts.into_values().collect()
  }
}

impl fmt::Display for Report<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let result = self.result;
    let media = match result.media_type {
      MediaType::Image => "图片",
      MediaType::Video => "视频",
    };

    writeln!(f, "分析类型: {}", media)?;
    if !result.has_pigs() {
      return writeln!(f, "未检测到猪只");
    }

    writeln!(f, "主要行为: {}", result.primary_behavior)?;
    match result.media_type {
      MediaType::Image => writeln!(f, "检测到猪只: {}", result.pig_count())?,
      MediaType::Video => writeln!(f, "跟踪到不同个体: {}", result.pig_count())?,
    }

    let shares = self.breakdown();
    if !shares.is_empty() {
      writeln!(f, "行为分布:")?;
      for share in &shares {
        writeln!(
          f,
          "  {:<14} {:>6} 次 {:>6.1}%",
          share.label, share.count, share.percent
        )?;
      }
    }

    if !result.pig_summaries.is_empty() {
      writeln!(f, "个体概况:")?;
      for summary in &result.pig_summaries {
        let mut flags = Vec::new();
        if summary.is_lethargic {
          flags.push(AlertKind::Lethargy.to_string());
        }
        if summary.is_limping {
          flags.push(AlertKind::Limping.to_string());
        }
        let flags = if flags.is_empty() {
          String::new()
        } else {
          format!(" [{}]", flags.join(", "))
        };
        writeln!(
          f,
          "  #{:<4} {}{}",
          summary.pig_id, summary.predominant_behavior, flags
        )?;
      }
    }

    let alerts = self.alerts();
    if !alerts.is_empty() {
      writeln!(f, "告警:")?;
      for alert in &alerts {
        if alert.times.is_empty() {
          writeln!(f, "  #{} {}", alert.pig_id, alert.kind)?;
        } else {
          writeln!(
            f,
            "  #{} {} ({})",
            alert.pig_id,
            alert.kind,
            alert.times.join(", ")
          )?;
        }
      }
    }

    if !result.time_series.is_empty() {
      writeln!(f, "时间序列:")?;
      for record in &result.time_series {
        let behaviors = record
          .behavior_breakdown
          .iter()
          .filter(|(_, bucket)| bucket.count > 0)
          .map(|(label, bucket)| format!("{} {}", label, bucket.count))
          .collect::<Vec<_>>()
          .join(", ");
        writeln!(f, "  {:>6} 猪只 {:>3} | {}", record.time, record.pig_count, behaviors)?;
      }
    }

    Ok(())
  }
}
