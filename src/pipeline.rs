// 该文件是 Chongshi （虫识） 项目的一部分。
// src/pipeline.rs - 检测、分类与标注流水线
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

//! 单图、批量与流式入口共用的流水线。
//!
//! 流水线在启动时构建一次，之后只读共享；模型与提示嵌入是唯一的进程级状态。

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  classifier::{Classifier, ClassifierError},
  config::PipelineConfig,
  frame::{Frame, FrameError},
  input::{DataUrlError, decode_data_url},
  model::{Detector, DetectorError},
  output::{Annotation, Draw},
  prediction::Prediction,
  record::{ClassifiedDetection, DetectionRecord, aggregate},
  wire::{AnnotateRequest, AnnotateResponse, DetectionsPayload, ErrorPayload, FrameReply},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] FrameError),
  #[error("无效的帧消息: {0}")]
  DataUrl(#[from] DataUrlError),
  #[error("检测失败: {0}")]
  Detector(#[from] DetectorError),
  #[error("分类失败: {0}")]
  Classifier(#[from] ClassifierError),
}

impl PipelineError {
  /// 稳定的错误类别，调用方据此分支
  pub fn kind(&self) -> &'static str {
    match self {
      PipelineError::Decode(_) => "decode",
      PipelineError::DataUrl(_) => "data_url",
      PipelineError::Detector(_) => "detector",
      PipelineError::Classifier(_) => "classifier",
    }
  }
}

impl From<&PipelineError> for ErrorPayload {
  fn from(err: &PipelineError) -> Self {
    ErrorPayload::new(err.kind(), err.to_string())
  }
}

/// 一帧的完整处理结果
#[derive(Debug, Clone)]
pub struct Processed {
  pub records: Vec<DetectionRecord>,
  pub annotation: Annotation,
}

pub struct Pipeline {
  detector: Box<dyn Detector>,
  classifier: Box<dyn Classifier>,
  config: PipelineConfig,
  draw: Draw,
}

impl Pipeline {
  pub fn new<D, C>(detector: D, classifier: C, config: PipelineConfig) -> Self
  where
    D: Detector + 'static,
    C: Classifier + 'static,
  {
    let draw = Draw::new(config.render.clone());
    Self {
      detector: Box::new(detector),
      classifier: Box::new(classifier),
      config,
      draw,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn draw(&self) -> &Draw {
    &self.draw
  }

  /// 在处理第一帧之前完成提示嵌入等一次性初始化
  pub fn warm_up(&self) -> Result<(), PipelineError> {
    let now = Instant::now();
    self.classifier.warm_up()?;
    info!("流水线预热完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }

  /// 检测并分类，返回按检测器顺序排列的记录
  pub fn detect(&self, frame: &Frame) -> Result<Vec<DetectionRecord>, PipelineError> {
    let now = Instant::now();
    let raw = self.detector.detect(frame)?;
    let elapsed_detect = now.elapsed();

    let threshold = self.config.confidence_threshold;
    let kept = raw.above(threshold);
    debug!(
      "检测器输出 {} 个候选框，{} 个高于阈值 {}",
      raw.len(),
      kept.len(),
      threshold
    );

    let (width, height) = frame.dimensions();
    let min_side = self.config.min_crop_side;
    let mut classified = Vec::with_capacity(kept.len());
    for detection in kept {
      let Some(region) = detection.bbox.clamp_to(width, height) else {
        debug!("丢弃退化的检测框: {:?}", detection.bbox);
        continue;
      };

      let classification = if region.width() < min_side || region.height() < min_side {
        debug!("子图过小，无法分类: {:?}", region);
        None
      } else {
        let crop = frame.crop(&region);
        Some(self.classifier.classify(&crop)?)
      };

      classified.push(ClassifiedDetection {
        region,
        detection_score: detection.score,
        classification,
      });
    }

    let records = aggregate(classified, self.config.unclassified);
    info!(
      "处理完成: {} 条记录，检测耗时 {:.2?}，总耗时 {:.2?}",
      records.len(),
      elapsed_detect,
      now.elapsed()
    );
    Ok(records)
  }

  pub fn detect_bytes(&self, bytes: &[u8]) -> Result<Vec<DetectionRecord>, PipelineError> {
    let frame = Frame::decode(bytes)?;
    self.detect(&frame)
  }

  /// 检测后在副本上绘制结果
  pub fn process(&self, frame: &Frame) -> Result<Processed, PipelineError> {
    let records = self.detect(frame)?;
    let predictions: Vec<Prediction> = records.iter().map(Prediction::from).collect();
    let annotation = self.draw.annotate(frame, &predictions);
    Ok(Processed {
      records,
      annotation,
    })
  }

  pub fn annotate(&self, frame: &Frame, predictions: &[Prediction]) -> Annotation {
    self.draw.annotate(frame, predictions)
  }

  /// 处理一条 `data:image/...;base64,` 消息，错误转换为结构化回复
  pub fn process_message(&self, message: &str) -> FrameReply {
    let result = decode_data_url(message)
      .map_err(PipelineError::from)
      .and_then(|bytes| self.detect_bytes(&bytes));
    Self::reply(result)
  }

  /// 处理一张编码图像，错误转换为结构化回复
  pub fn detect_reply(&self, bytes: &[u8]) -> FrameReply {
    Self::reply(self.detect_bytes(bytes))
  }

  /// 逐个处理，单个失败不影响其余图像
  pub fn detect_batch<B: AsRef<[u8]>>(&self, images: &[B]) -> Vec<FrameReply> {
    images
      .iter()
      .enumerate()
      .map(|(index, bytes)| {
        debug!("批量处理第 {} 张图像", index);
        self.detect_reply(bytes.as_ref())
      })
      .collect()
  }

  pub fn annotate_request(&self, request: &AnnotateRequest) -> AnnotateResponse {
    self.draw.respond(request)
  }

  fn reply(result: Result<Vec<DetectionRecord>, PipelineError>) -> FrameReply {
    match result {
      Ok(detections) => FrameReply::Detections(DetectionsPayload { detections }),
      Err(e) => {
        warn!("处理失败 ({}): {}", e.kind(), e);
        FrameReply::Error(ErrorPayload::from(&e))
      }
    }
  }
}

#[cfg(feature = "clip_onnx")]
impl Pipeline {
  /// 由检测器与编码器地址构建流水线并完成预热，任何失败都应终止启动
  pub fn from_urls(
    detector: &url::Url,
    encoder: &url::Url,
    config: PipelineConfig,
  ) -> anyhow::Result<Self> {
    use crate::{
      FromUrl,
      classifier::{ClipOnnxBuilder, ZeroShotClassifier},
      model::DetectorWrapper,
    };

    info!("检测器: {}://{}", detector.scheme(), detector.path());
    let detector = DetectorWrapper::from_url(detector)?;
    info!("编码器: {}", encoder);
    let encoder = ClipOnnxBuilder::from_url(encoder)?.build()?;
    let classifier = ZeroShotClassifier::new(config.prompt_set()?, encoder);

    let pipeline = Pipeline::new(detector, classifier, config);
    pipeline.warm_up()?;
    Ok(pipeline)
  }
}
