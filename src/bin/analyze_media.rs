// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/bin/analyze_media.rs - 单次图片/视频分析
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

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use bantai::{
  analysis::{AnalysisClient, MediaKind},
  config::DEFAULT_SERVER,
  report::Report,
};

/// Bantai 单次分析
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理服务器地址
  #[arg(long, value_name = "SERVER", env = "BANTAI_SERVER", default_value = DEFAULT_SERVER)]
  pub server: Url,
  /// 待分析的图片或视频文件
  #[arg(long, value_name = "FILE")]
  pub file: PathBuf,
  /// 强制指定媒体类型 (image / video)，默认按扩展名判断
  #[arg(long, value_name = "KIND")]
  pub kind: Option<MediaKind>,
  /// 请求超时（秒），视频分析可能较慢
  #[arg(long, value_name = "SECONDS", default_value_t = 300)]
  pub timeout_secs: u64,
  /// 分析前重置服务器的跟踪编号
  #[arg(long)]
  pub reset: bool,
  /// 输出原始 JSON 而不是文本报告
  #[arg(long)]
  pub json: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("服务器地址: {}", args.server);
  info!("分析文件: {}", args.file.display());

  let client = AnalysisClient::new(args.server, Duration::from_secs(args.timeout_secs))?;
  if args.reset {
    client.reset_tracking()?;
  }

  let result = match args.kind {
    Some(kind) => client.analyze_as(kind, &args.file)?,
    None => client.analyze(&args.file)?,
  };

  if args.json {
    println!("{}", serde_json::to_string_pretty(&result)?);
  } else {
    print!("{}", Report::new(&result));
  }

  Ok(())
}
