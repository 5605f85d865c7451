// 该文件是 Chongshi （虫识） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的桩实现
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

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicUsize, Ordering},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chongshi::{
  bbox::BoundingBox,
  classifier::{ClassificationResult, Classifier, ClassifierError, EmbeddingModel, EncoderError},
  frame::Frame,
  model::{DetectResult, Detector, DetectorError, RawDetection},
};
use image::{ImageFormat, Rgb, RgbImage};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

/// 总是返回同一组候选框
pub struct StubDetector(pub Vec<RawDetection>);

impl StubDetector {
  pub fn single(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
    Self(vec![RawDetection {
      bbox: BoundingBox::new(x1, y1, x2, y2),
      score,
    }])
  }
}

impl Detector for StubDetector {
  fn detect(&self, _frame: &Frame) -> Result<DetectResult, DetectorError> {
    Ok(self.0.clone().into())
  }
}

/// 返回覆盖整幅图像的一个框，便于从记录中看出处理的是哪一帧
pub struct WholeFrameDetector;

impl Detector for WholeFrameDetector {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError> {
    let (w, h) = frame.dimensions();
    Ok(
      vec![RawDetection {
        bbox: BoundingBox::new(0.0, 0.0, (w - 1) as f32, (h - 1) as f32),
        score: 0.9,
      }]
      .into(),
    )
  }
}

/// 第一次调用时置位取消标志，模拟处理过程中收到中断
pub struct CancellingDetector(pub Arc<AtomicBool>);

impl Detector for CancellingDetector {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError> {
    self.0.store(true, Ordering::SeqCst);
    WholeFrameDetector.detect(frame)
  }
}

pub struct FailingDetector;

impl Detector for FailingDetector {
  fn detect(&self, _frame: &Frame) -> Result<DetectResult, DetectorError> {
    Err(DetectorError::Remote("connection refused".into()))
  }
}

pub struct StubClassifier {
  pub label: String,
  pub score: f32,
}

impl StubClassifier {
  pub fn new(label: &str, score: f32) -> Self {
    Self {
      label: label.to_string(),
      score,
    }
  }
}

impl Classifier for StubClassifier {
  fn classify(&self, _crop: &RgbImage) -> Result<ClassificationResult, ClassifierError> {
    Ok(ClassificationResult {
      index: 0,
      label: self.label.clone(),
      score: self.score,
      probabilities: vec![self.score, 1.0 - self.score],
    })
  }
}

/// 图像嵌入取子图的平均 RGB，文本嵌入是按序号的单位向量
#[derive(Default)]
pub struct ColorEmbedding {
  pub text_calls: AtomicUsize,
}

impl EmbeddingModel for ColorEmbedding {
  fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EncoderError> {
    let n = (image.width() * image.height()).max(1) as f32;
    let mut sum = [0.0f32; 3];
    for pixel in image.pixels() {
      for c in 0..3 {
        sum[c] += pixel[c] as f32;
      }
    }
    Ok(sum.iter().map(|s| s / n).chain([0.0]).collect())
  }

  fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncoderError> {
    self.text_calls.fetch_add(1, Ordering::SeqCst);
    Ok(
      (0..texts.len())
        .map(|i| {
          let mut v = vec![0.0; 4];
          v[i % 4] = 1.0;
          v
        })
        .collect(),
    )
  }
}

pub fn white_frame(width: u32, height: u32) -> Frame {
  Frame::try_from(RgbImage::from_pixel(width, height, WHITE)).unwrap()
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

pub fn data_url(width: u32, height: u32) -> String {
  let image = RgbImage::from_pixel(width, height, WHITE);
  format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(&image)))
}
