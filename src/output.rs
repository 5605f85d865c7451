// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output.rs - 输出定义
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

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::RenderStyle,
  frame::{Frame, FrameError},
  record::DetectionRecord,
  wire::{AnnotateRequest, AnnotateResponse},
};

pub trait Render: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, records: &[DetectionRecord]) -> Result<(), Self::Error>;
}

pub mod draw;

mod json_record;
mod save_image_file;

pub use self::draw::{Annotation, Draw, encode_jpeg};
pub use self::json_record::{JsonRecordError, JsonRecordOutput};
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

/// 标注请求的失败原因
#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("图像解码失败: {0}")]
  Decode(#[from] FrameError),
  #[error("JPEG 编码失败: {0}")]
  Encode(#[from] image::ImageError),
}

impl AnnotateError {
  pub fn kind(&self) -> &'static str {
    match self {
      AnnotateError::Base64(_) | AnnotateError::Decode(_) => "decode",
      AnnotateError::Encode(_) => "encode",
    }
  }
}

impl Draw {
  /// 解码请求中的图像，绘制后返回 base64 编码的 JPEG
  pub fn annotate_request(&self, request: &AnnotateRequest) -> Result<String, AnnotateError> {
    // 按行折返的 base64 同样接受
    let payload: String = request.image_base64.split_ascii_whitespace().collect();
    let bytes = STANDARD.decode(payload)?;
    let frame = Frame::decode(&bytes)?;
    let annotation = self.annotate(&frame, &request.predictions);
    let jpeg = encode_jpeg(&annotation.image)?;
    Ok(STANDARD.encode(jpeg))
  }

  /// 与 `annotate_request` 相同，失败转换为 `status: error` 回复
  pub fn respond(&self, request: &AnnotateRequest) -> AnnotateResponse {
    match self.annotate_request(request) {
      Ok(annotated_image_base64) => AnnotateResponse::Success {
        annotated_image_base64,
      },
      Err(e) => {
        warn!("标注失败: {}", e);
        AnnotateResponse::Error {
          kind: e.kind().to_string(),
          message: e.to_string(),
        }
      }
    }
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFile(#[from] SaveImageFileError),
  #[error("记录文件错误: {0}")]
  JsonRecord(#[from] JsonRecordError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  SaveImageFile(SaveImageFileOutput),
  JsonRecord(JsonRecordOutput),
}

impl OutputWrapper {
  /// 替换标注样式，只对图像输出有效
  pub fn with_style(self, style: RenderStyle) -> Self {
    match self {
      OutputWrapper::SaveImageFile(output) => {
        OutputWrapper::SaveImageFile(output.with_style(style))
      }
      other => other,
    }
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      JsonRecordOutput::SCHEME => Ok(OutputWrapper::JsonRecord(JsonRecordOutput::from_url(url)?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, records: &[DetectionRecord]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFile(output) => output
        .render_result(frame, records)
        .map_err(OutputError::from),
      OutputWrapper::JsonRecord(output) => output
        .render_result(frame, records)
        .map_err(OutputError::from),
    }
  }
}
