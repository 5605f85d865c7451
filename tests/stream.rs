// 该文件是 Chongshi （虫识） 项目的一部分。
// tests/stream.rs - 流式任务测试
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

mod common;

use std::io::Cursor;
use std::sync::{Arc, atomic::AtomicBool, mpsc::channel};

use chongshi::{
  Pipeline,
  config::{Backpressure, PipelineConfig},
  input::{ImageFileInput, InputError},
  task::{BatchTask, ContinuousTask, StreamStats, Task},
  wire::FrameReply,
};
use common::*;
use image::RgbImage;

fn pipeline() -> Pipeline {
  Pipeline::new(
    WholeFrameDetector,
    StubClassifier::new("stem borer", 0.8),
    PipelineConfig::default(),
  )
}

fn replies(output: &[u8]) -> Vec<FrameReply> {
  String::from_utf8_lossy(output)
    .lines()
    .map(|line| serde_json::from_str(line).unwrap())
    .collect()
}

fn widths(replies: &[FrameReply]) -> Vec<u32> {
  replies
    .iter()
    .map(|reply| match reply {
      FrameReply::Detections(payload) => payload.detections[0].bbox[2] + 1,
      FrameReply::Error(payload) => panic!("unexpected error: {:?}", payload),
    })
    .collect()
}

#[test]
fn queue_answers_every_frame_in_order() {
  let input = [8, 9, 10, 11]
    .iter()
    .map(|w| data_url(*w, 6))
    .collect::<Vec<_>>()
    .join("\n");
  let mut output = Vec::new();
  let stats = ContinuousTask::new(Backpressure::Queue)
    .run_stream(
      Cursor::new(input.into_bytes()),
      &pipeline(),
      &mut output,
      Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

  assert_eq!(
    stats,
    StreamStats {
      answered: 4,
      skipped: 0,
      discarded: 0
    }
  );
  assert_eq!(widths(&replies(&output)), vec![8, 9, 10, 11]);
}

#[test]
fn latest_skips_backlog() {
  let (tx, rx) = channel();
  for w in [8, 9, 10, 11] {
    tx.send(data_url(w, 6)).unwrap();
  }
  drop(tx);

  let mut output = Vec::new();
  let stats = ContinuousTask::new(Backpressure::Latest)
    .drive(rx, &pipeline(), &mut output, &AtomicBool::new(false))
    .unwrap();

  assert_eq!(stats.answered, 1);
  assert_eq!(stats.skipped, 3);
  assert_eq!(widths(&replies(&output)), vec![11]);
}

#[test]
fn malformed_frame_does_not_end_the_stream() {
  let input = format!("not a frame\n\n{}\n", data_url(12, 6));
  let mut output = Vec::new();
  let stats = ContinuousTask::new(Backpressure::Queue)
    .run_stream(
      Cursor::new(input.into_bytes()),
      &pipeline(),
      &mut output,
      Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

  assert_eq!(stats.answered, 2);
  let replies = replies(&output);
  match &replies[0] {
    FrameReply::Error(payload) => assert_eq!(payload.error.kind, "data_url"),
    other => panic!("unexpected reply: {:?}", other),
  }
  assert_eq!(widths(&replies[1..]), vec![12]);
}

#[test]
fn cancellation_discards_the_in_flight_frame() {
  let cancel = Arc::new(AtomicBool::new(false));
  let pipeline = Pipeline::new(
    CancellingDetector(cancel.clone()),
    StubClassifier::new("stem borer", 0.8),
    PipelineConfig::default(),
  );
  let (tx, rx) = channel();
  tx.send(data_url(8, 8)).unwrap();
  tx.send(data_url(9, 8)).unwrap();
  drop(tx);

  let mut output = Vec::new();
  let stats = ContinuousTask::new(Backpressure::Queue)
    .drive(rx, &pipeline, &mut output, &cancel)
    .unwrap();

  assert_eq!(stats.answered, 0);
  assert_eq!(stats.discarded, 1);
  assert!(output.is_empty());
}

#[test]
fn frame_number_limits_the_stream() {
  let (tx, rx) = channel();
  for w in [8, 9, 10] {
    tx.send(data_url(w, 6)).unwrap();
  }
  drop(tx);

  let mut output = Vec::new();
  let stats = ContinuousTask::new(Backpressure::Queue)
    .with_frame_number(Some(2))
    .drive(rx, &pipeline(), &mut output, &AtomicBool::new(false))
    .unwrap();
  assert_eq!(stats.answered, 2);
  assert_eq!(widths(&replies(&output)), vec![8, 9]);
}

#[test]
fn batch_task_writes_one_array() {
  let dir = tempfile::tempdir().unwrap();
  let good = dir.path().join("good.png");
  std::fs::write(&good, png_bytes(&RgbImage::from_pixel(10, 7, WHITE))).unwrap();
  let missing = dir.path().join("missing.png");

  let inputs = [good, missing]
    .into_iter()
    .map(|path| ImageFileInput::new(path).read_bytes().map_err(InputError::from));
  let mut output = Vec::new();
  BatchTask::new(&mut output)
    .run_task(inputs, &pipeline(), ())
    .unwrap();

  let replies: Vec<FrameReply> = serde_json::from_slice(&output).unwrap();
  assert_eq!(replies.len(), 2);
  assert_eq!(widths(&replies[..1]), vec![10]);
  match &replies[1] {
    FrameReply::Error(payload) => assert_eq!(payload.error.kind, "input"),
    other => panic!("unexpected reply: {:?}", other),
  }
}
