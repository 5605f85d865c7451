// 该文件是 Chongshi （虫识） 项目的一部分。
// src/model.rs - 检测模型
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, bbox::BoundingBox, frame::Frame};

/// 检测器输出的候选框
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  /// 原图像素坐标，角点形式
  pub bbox: BoundingBox,
  /// 检测置信度 [0, 1]
  pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[RawDetection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 按置信度过滤，只保留严格大于阈值的检测，保持原有顺序
  pub fn above(&self, threshold: f32) -> Vec<RawDetection> {
    self
      .items
      .iter()
      .filter(|item| item.score > threshold)
      .cloned()
      .collect()
  }
}

impl From<Vec<RawDetection>> for DetectResult {
  fn from(items: Vec<RawDetection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("远程检测服务错误: {0}")]
  Remote(String),
  #[error("远程检测服务返回状态 {status}: {body}")]
  RemoteStatus { status: u16, body: String },
  #[error("远程检测结果解析错误: {0}")]
  RemoteSchema(#[from] serde_json::Error),
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("检测器地址错误: {0}")]
  Url(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 目标检测器：对整幅图像给出未经阈值过滤的候选框，按输出顺序排列
pub trait Detector: Send + Sync {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError> {
    (**self).detect(frame)
  }
}

/// 非极大值抑制，结果按置信度降序
pub fn nms(mut items: Vec<(RawDetection, u32)>, iou_threshold: f32) -> Vec<RawDetection> {
  items.sort_by(|a, b| b.0.score.total_cmp(&a.0.score));

  let mut result: Vec<(RawDetection, u32)> = Vec::with_capacity(items.len());
  for (det, class_id) in items {
    let suppressed = result
      .iter()
      .any(|(kept, kept_class)| *kept_class == class_id && kept.bbox.iou(&det.bbox) >= iou_threshold);
    if !suppressed {
      result.push((det, class_id));
    }
  }

  result.into_iter().map(|(det, _)| det).collect()
}

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

#[cfg(feature = "remote_detector")]
mod remote;
#[cfg(feature = "remote_detector")]
pub use self::remote::{RemoteDetector, RemotePrediction, RemoteResponse};

/// 按 URL 方案选择检测器实现
pub enum DetectorWrapper {
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26),
  #[cfg(feature = "remote_detector")]
  Remote(RemoteDetector),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_yolo26")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == Yolo26Builder::SCHEME {
        let model = Yolo26Builder::from_url(url)
          .and_then(Yolo26Builder::build)
          .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
        return Ok(DetectorWrapper::Yolo26(model));
      }
    }
    #[cfg(feature = "remote_detector")]
    {
      if RemoteDetector::accepts(url) {
        return Ok(DetectorWrapper::Remote(RemoteDetector::from_url(url)?));
      }
    }
    Err(DetectorError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Detector for DetectorWrapper {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError> {
    match self {
      #[cfg(feature = "model_yolo26")]
      DetectorWrapper::Yolo26(model) => model.detect(frame),
      #[cfg(feature = "remote_detector")]
      DetectorWrapper::Remote(remote) => remote.detect(frame),
      // 未启用任何检测器后端时该枚举无法构造
      #[cfg(not(any(feature = "model_yolo26", feature = "remote_detector")))]
      _ => {
        let _ = frame;
        unreachable!("未启用任何检测器后端")
      }
    }
  }
}
