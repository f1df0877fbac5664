// 该文件是 Bantai （猪舍守望） 项目的一部分。
// src/bin/live_stream.rs - 实时推流客户端
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
  io::{self, BufRead, Write},
  sync::mpsc::{self, Sender},
  thread,
  time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use bantai::{
  FromUrl,
  config::{DEFAULT_STREAM_URL, StreamerConfig},
  input::InputWrapper,
  output::OutputWrapper,
  streamer::Escalation,
  task::{Command, DecisionHandler, LiveTask, Task},
  transport::ConnectorWrapper,
};

/// Bantai 实时推流
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推流地址。ws:// 使用 WebSocket，http:// 使用逐帧上传；
  /// 查询串可覆盖推流参数，例如 ?interval=300&max_pigs=10
  #[arg(long, value_name = "STREAM", env = "BANTAI_STREAM", default_value = DEFAULT_STREAM_URL)]
  pub stream: Url,
  /// 采集来源，例如 gst://camera/dev/video0 或 image:///tmp/pen.jpg?repeat
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 叠加画面输出，例如 image:///tmp/latest.png 或 folder:///var/lib/bantai
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 连续失败时不询问，直接重试
  #[arg(long)]
  pub auto_retry: bool,
}

/// 在终端询问重试还是放弃，回答经命令通道送回推流任务
struct PromptDecision {
  commands: Sender<Command>,
}

impl DecisionHandler for PromptDecision {
  fn on_decision_required(&mut self, escalation: Escalation) {
    let commands = self.commands.clone();
    let errors = escalation.consecutive_errors;
    let spawned = thread::Builder::new()
      .name("decision-prompt".into())
      .spawn(move || {
        print!("连续 {} 帧失败，重试还是放弃？[R/a] ", errors);
        let _ = io::stdout().flush();
        let mut line = String::new();
        let command = match io::stdin().lock().read_line(&mut line) {
          Ok(_) if line.trim().eq_ignore_ascii_case("a") => Command::Abort,
          Ok(_) => Command::Retry,
          Err(_) => Command::Abort,
        };
        let _ = commands.send(command);
      });
    if let Err(e) = spawned {
      warn!("无法等待用户输入，放弃推流: {}", e);
      let _ = self.commands.send(Command::Abort);
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("推流地址: {}", args.stream);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = StreamerConfig::from_url(&args.stream)?;
  info!("推流参数: {:?}", config);

  let input = InputWrapper::from_url(&args.input)?;
  let connector = ConnectorWrapper::from_url(&args.stream)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let (tx, rx) = mpsc::channel();

  let interrupt = tx.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = interrupt.send(Command::Teardown);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let task = LiveTask::new(config, rx).with_frame_number(args.frame_number);
  let task = if args.auto_retry {
    let retry = tx.clone();
    task.with_decision_handler(move |_: Escalation| {
      let _ = retry.send(Command::Retry);
    })
  } else {
    task.with_decision_handler(PromptDecision {
      commands: tx.clone(),
    })
  };

  let stats = task.run_task(input, connector, output)?;
  println!(
    "发送 {} 帧，收到 {} 个响应，错误 {} 次，重连 {} 次",
    stats.frames_sent, stats.responses, stats.error_count, stats.reconnects
  );

  Ok(())
}
