// 该文件是 Chongshi （虫识） 项目的一部分。
// src/task.rs - 单图、批量与流式任务
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
  io::{BufRead, Write},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, RecvTimeoutError, channel},
  },
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  config::Backpressure,
  frame::Frame,
  input::InputError,
  output::Render,
  pipeline::Pipeline,
  wire::{DetectionsPayload, ErrorPayload, FrameReply},
};

const CANCEL_POLL: Duration = Duration::from_millis(100);
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: &Pipeline, output: O) -> Result<(), Self::Error>;
}

/// 处理一张图像：记录写到 `out`，标注结果交给输出
pub struct OneShotTask<W> {
  out: W,
}

impl<W: Write> OneShotTask<W> {
  pub fn new(out: W) -> Self {
    Self { out }
  }
}

impl<W, I, O> Task<I, O> for OneShotTask<W>
where
  W: Write,
  I: Iterator<Item = Result<Vec<u8>, InputError>>,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(mut self, mut input: I, pipeline: &Pipeline, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let bytes = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))??;
    let frame = Frame::decode(&bytes)?;
    info!("输入图像 {}x{}，开始推理...", frame.width(), frame.height());

    let now = Instant::now();
    let records = pipeline.detect(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    output.render_result(&frame, &records)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    serde_json::to_writer(&mut self.out, &DetectionsPayload { detections: records })?;
    writeln!(self.out)?;
    Ok(())
  }
}

/// 逐张处理，结果按输入顺序写成一个 JSON 数组
pub struct BatchTask<W> {
  out: W,
}

impl<W: Write> BatchTask<W> {
  pub fn new(out: W) -> Self {
    Self { out }
  }
}

impl<W, I> Task<I, ()> for BatchTask<W>
where
  W: Write,
  I: Iterator<Item = Result<Vec<u8>, InputError>>,
{
  type Error = anyhow::Error;

  fn run_task(mut self, input: I, pipeline: &Pipeline, _output: ()) -> Result<(), Self::Error> {
    info!("开始批量任务...");
    let now = Instant::now();
    let replies: Vec<FrameReply> = input
      .enumerate()
      .map(|(index, item)| match item {
        Ok(bytes) => {
          debug!("处理第 {} 张图像", index);
          pipeline.detect_reply(&bytes)
        }
        Err(e) => {
          warn!("第 {} 张图像读取失败: {}", index, e);
          FrameReply::Error(ErrorPayload::new("input", e.to_string()))
        }
      })
      .collect();

    let failed = replies.iter().filter(|r| r.is_error()).count();
    info!(
      "批量任务完成: {} 张，失败 {} 张，耗时: {:.2?}",
      replies.len(),
      failed,
      now.elapsed()
    );

    serde_json::to_writer_pretty(&mut self.out, &replies)?;
    writeln!(self.out)?;
    Ok(())
  }
}

/// 流式任务统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
  pub answered: usize,
  pub skipped: usize,
  /// 因中断而丢弃的在途帧
  pub discarded: usize,
}

/// 逐行读取 data URL 帧，每帧输出一行 JSON；同一时刻只处理一帧
#[derive(Debug, Default)]
pub struct ContinuousTask {
  backpressure: Backpressure,
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn new(backpressure: Backpressure) -> Self {
    Self {
      backpressure,
      frame_number: None,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 读线程把消息送入通道，主循环按积压策略取帧处理
  pub fn run_stream<R, W>(
    &self,
    reader: R,
    pipeline: &Pipeline,
    writer: W,
    cancel: Arc<AtomicBool>,
  ) -> anyhow::Result<StreamStats>
  where
    R: BufRead + Send + 'static,
    W: Write,
  {
    let (tx, rx) = channel();
    thread::spawn(move || {
      for line in reader.lines() {
        match line {
          Ok(line) if line.trim().is_empty() => continue,
          Ok(line) => {
            if tx.send(line).is_err() {
              break;
            }
          }
          Err(e) => {
            warn!("读取输入流失败: {}", e);
            break;
          }
        }
      }
      debug!("输入流结束");
    });

    self.drive(rx, pipeline, writer, &cancel)
  }

  pub fn drive<W: Write>(
    &self,
    rx: Receiver<String>,
    pipeline: &Pipeline,
    mut writer: W,
    cancel: &AtomicBool,
  ) -> anyhow::Result<StreamStats> {
    let mut stats = StreamStats::default();
    let mut frame_index = 0usize;

    loop {
      if cancel.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let mut message = match rx.recv_timeout(CANCEL_POLL) {
        Ok(message) => message,
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => break,
      };

      if self.backpressure == Backpressure::Latest {
        while let Ok(newer) = rx.try_recv() {
          message = newer;
          stats.skipped += 1;
        }
      }

      frame_index += 1;
      info!("处理第 {} 帧", frame_index);
      let now = Instant::now();
      let reply = pipeline.process_message(&message);

      if cancel.load(Ordering::SeqCst) {
        warn!("第 {} 帧处理中收到中断，丢弃结果", frame_index);
        stats.discarded += 1;
        break;
      }

      serde_json::to_writer(&mut writer, &reply)?;
      writeln!(writer)?;
      writer.flush()?;
      stats.answered += 1;
      debug!("第 {} 帧完成，耗时: {:.2?}", frame_index, now.elapsed());

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
    }

    if stats.skipped > 0 {
      warn!("共跳过 {} 个积压帧", stats.skipped);
    }
    info!("任务完成，退出");
    Ok(stats)
  }
}

/// 安装 Ctrl-C 处理：置位取消标志，30 秒后仍未退出则强制结束进程
pub fn install_cancel_handler() -> anyhow::Result<Arc<AtomicBool>> {
  let cancel = Arc::new(AtomicBool::new(false));
  let flag = cancel.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(cancel)
}

impl<R, W> Task<R, W> for ContinuousTask
where
  R: BufRead + Send + 'static,
  W: Write,
{
  type Error = anyhow::Error;

  fn run_task(self, input: R, pipeline: &Pipeline, output: W) -> Result<(), Self::Error> {
    info!("开始流式任务，积压策略: {:?}", self.backpressure);
    let cancel = install_cancel_handler()?;
    let stats = self.run_stream(input, pipeline, output, cancel)?;
    info!(
      "已回复 {} 帧，跳过 {} 帧，丢弃 {} 帧",
      stats.answered, stats.skipped, stats.discarded
    );
    Ok(())
  }
}
