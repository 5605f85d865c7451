// 该文件是 Chongshi （虫识） 项目的一部分。
// tests/pipeline.rs - 流水线端到端测试
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

use std::sync::atomic::Ordering;
use std::{io::Write, sync::Arc};

use chongshi::{
  Pipeline,
  bbox::BoundingBox,
  classifier::{PromptSet, ZeroShotClassifier},
  config::{DEFAULT_PROMPTS, PipelineConfig},
  frame::Frame,
  model::RawDetection,
  prediction::Prediction,
  record::DetectionRecord,
  wire::FrameReply,
};
use common::*;
use image::RgbImage;
use proptest::prelude::*;

fn pipeline_with(detector: StubDetector) -> Pipeline {
  Pipeline::new(
    detector,
    StubClassifier::new("leaf folder caterpillar pest", 0.75),
    PipelineConfig::default(),
  )
}

#[test]
fn single_pest_on_white_image() {
  let pipeline = pipeline_with(StubDetector::single(10.0, 10.0, 50.0, 50.0, 0.90));
  let frame = white_frame(100, 100);

  let processed = pipeline.process(&frame).unwrap();
  assert_eq!(
    processed.records,
    vec![DetectionRecord {
      bbox: [10, 10, 50, 50],
      yolo_conf: 0.9,
      clip_conf: 0.75,
      label: "leaf folder caterpillar pest".to_string(),
    }]
  );

  let image = &processed.annotation.image;
  assert_eq!(image.dimensions(), (100, 100));
  // 边框
  assert_eq!(*image.get_pixel(10, 45), RED);
  assert_eq!(*image.get_pixel(50, 45), RED);
  assert_eq!(*image.get_pixel(30, 50), RED);
  assert_eq!(*image.get_pixel(30, 45), WHITE);
  // 标签背景贴住图像顶部
  assert_eq!(*image.get_pixel(12, 0), RED);
  assert_eq!(*image.get_pixel(8, 0), WHITE);
}

#[test]
fn detection_below_default_threshold_is_absent() {
  let pipeline = pipeline_with(StubDetector::single(10.0, 10.0, 50.0, 50.0, 0.25));
  assert!(pipeline.detect(&white_frame(100, 100)).unwrap().is_empty());
}

#[test]
fn detection_exactly_at_threshold_is_absent() {
  let pipeline = pipeline_with(StubDetector::single(10.0, 10.0, 50.0, 50.0, 0.3));
  assert!(pipeline.detect(&white_frame(100, 100)).unwrap().is_empty());
}

#[test]
fn records_keep_detector_order() {
  let detector = StubDetector(vec![
    RawDetection {
      bbox: BoundingBox::new(60.0, 60.0, 90.0, 90.0),
      score: 0.4,
    },
    RawDetection {
      bbox: BoundingBox::new(5.0, 5.0, 20.0, 20.0),
      score: 0.2,
    },
    RawDetection {
      bbox: BoundingBox::new(5.0, 5.0, 20.0, 20.0),
      score: 0.95,
    },
  ]);
  let records = pipeline_with(detector).detect(&white_frame(100, 100)).unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].bbox, [60, 60, 90, 90]);
  assert_eq!(records[1].yolo_conf, 0.95);
}

#[test]
fn zero_shot_classifier_labels_crops_by_prompt() {
  let prompts = PromptSet::new(DEFAULT_PROMPTS).unwrap();
  let model = Arc::new(ColorEmbedding::default());
  let classifier = ZeroShotClassifier::new(prompts, model.clone());
  let detector = StubDetector(vec![
    RawDetection {
      bbox: BoundingBox::new(0.0, 0.0, 9.0, 9.0),
      score: 0.8,
    },
    RawDetection {
      bbox: BoundingBox::new(10.0, 0.0, 19.0, 9.0),
      score: 0.8,
    },
  ]);
  let pipeline = Pipeline::new(detector, classifier, PipelineConfig::default());
  pipeline.warm_up().unwrap();

  // 左半红色，右半绿色
  let image = RgbImage::from_fn(20, 10, |x, _| {
    if x < 10 {
      image::Rgb([255, 0, 0])
    } else {
      image::Rgb([0, 255, 0])
    }
  });
  let records = pipeline.detect(&Frame::try_from(image).unwrap()).unwrap();
  assert_eq!(records[0].label, DEFAULT_PROMPTS[0]);
  assert_eq!(records[1].label, DEFAULT_PROMPTS[1]);
  assert_eq!(records[0].clip_conf, 1.0);
  assert_eq!(model.text_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn pipeline_is_shared_across_threads() {
  let pipeline = pipeline_with(StubDetector::single(10.0, 10.0, 50.0, 50.0, 0.9));
  let frame = white_frame(64, 64);
  let expected = pipeline.detect(&frame).unwrap();

  std::thread::scope(|s| {
    let handles: Vec<_> = (0..8)
      .map(|_| s.spawn(|| pipeline.detect(&frame).unwrap()))
      .collect();
    for handle in handles {
      assert_eq!(handle.join().unwrap(), expected);
    }
  });
}

#[test]
fn failures_become_structured_replies() {
  let pipeline = Pipeline::new(
    FailingDetector,
    StubClassifier::new("x", 0.5),
    PipelineConfig::default(),
  );
  let images = vec![b"garbage".to_vec(), png_bytes(&RgbImage::new(8, 8))];
  let replies = pipeline.detect_batch(&images);
  assert_eq!(replies.len(), 2);
  match (&replies[0], &replies[1]) {
    (FrameReply::Error(a), FrameReply::Error(b)) => {
      assert_eq!(a.error.kind, "decode");
      assert_eq!(b.error.kind, "detector");
    }
    other => panic!("unexpected replies: {:?}", other),
  }
}

#[test]
fn batch_mixes_success_and_failure() {
  let pipeline = pipeline_with(StubDetector::single(1.0, 1.0, 6.0, 6.0, 0.9));
  let images = vec![png_bytes(&RgbImage::new(8, 8)), Vec::new()];
  let replies = pipeline.detect_batch(&images);
  assert!(matches!(&replies[0], FrameReply::Detections(p) if p.detections.len() == 1));
  assert!(replies[1].is_error());
}

#[test]
fn annotate_with_no_predictions_is_identity() {
  let pipeline = pipeline_with(StubDetector(vec![]));
  let frame = white_frame(37, 21);
  let annotation = pipeline.annotate(&frame, &[]);
  assert_eq!(annotation.image, *frame.as_rgb_image());
}

#[test]
fn config_file_changes_threshold_and_style() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(
    file,
    "confidence_threshold = 0.5\n[render]\nstroke_color = [0, 0, 255]\nlabel_placement = \"inside\""
  )
  .unwrap();
  let config = PipelineConfig::load(file.path()).unwrap();

  let detector = StubDetector(vec![
    RawDetection {
      bbox: BoundingBox::new(10.0, 10.0, 50.0, 50.0),
      score: 0.45,
    },
    RawDetection {
      bbox: BoundingBox::new(20.0, 20.0, 60.0, 60.0),
      score: 0.55,
    },
  ]);
  let pipeline = Pipeline::new(detector, StubClassifier::new("moth", 0.6), config);
  let processed = pipeline.process(&white_frame(100, 100)).unwrap();
  assert_eq!(processed.records.len(), 1);
  assert_eq!(
    *processed.annotation.image.get_pixel(40, 60),
    image::Rgb([0, 0, 255])
  );
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(32))]

  #[test]
  fn threshold_boundary(threshold in 0.05f32..0.95) {
    let config = PipelineConfig {
      confidence_threshold: threshold,
      ..PipelineConfig::default()
    };
    let detector = StubDetector(vec![
      RawDetection { bbox: BoundingBox::new(1.0, 1.0, 8.0, 8.0), score: threshold },
      RawDetection { bbox: BoundingBox::new(2.0, 2.0, 9.0, 9.0), score: threshold + 1e-3 },
    ]);
    let pipeline = Pipeline::new(detector, StubClassifier::new("x", 0.5), config);
    let records = pipeline.detect(&white_frame(16, 16)).unwrap();
    prop_assert_eq!(records.len(), 1);
    prop_assert_eq!(records[0].bbox, [2, 2, 9, 9]);
  }

  #[test]
  fn annotation_keeps_dimensions(
    width in 1u32..80,
    height in 1u32..80,
    boxes in proptest::collection::vec((-20.0f32..100.0, -20.0f32..100.0, 0.0f32..60.0, 0.0f32..60.0), 1..6),
  ) {
    let pipeline = pipeline_with(StubDetector(vec![]));
    let frame = white_frame(width, height);
    let predictions: Vec<Prediction> = boxes
      .into_iter()
      .map(|(x, y, w, h)| Prediction::new(BoundingBox::new(x, y, x + w, y + h), "pest", 0.5))
      .collect();
    let annotation = pipeline.annotate(&frame, &predictions);
    prop_assert_eq!(annotation.image.dimensions(), (width, height));
    prop_assert_eq!(annotation.drawn + annotation.skipped, predictions.len());
  }
}
