// 该文件是 Chongshi （虫识） 项目的一部分。
// src/wire.rs - 对外消息格式
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

use serde::{Deserialize, Serialize};

use crate::{prediction::Prediction, record::DetectionRecord};

/// 每帧的检测输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionsPayload {
  pub detections: Vec<DetectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
  pub kind: String,
  pub message: String,
}

/// 单个请求失败时返回给调用方的结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
  pub error: ErrorBody,
}

impl ErrorPayload {
  pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      error: ErrorBody {
        kind: kind.into(),
        message: message.into(),
      },
    }
  }
}

/// 单帧处理结果，成功与失败共用一个输出通道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameReply {
  Detections(DetectionsPayload),
  Error(ErrorPayload),
}

impl FrameReply {
  pub fn is_error(&self) -> bool {
    matches!(self, FrameReply::Error(_))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotateRequest {
  pub image_base64: String,
  #[serde(default)]
  pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnnotateResponse {
  Success { annotated_image_base64: String },
  Error { kind: String, message: String },
}
