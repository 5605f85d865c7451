// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output/json_record.rs - 检测记录保存为 JSON
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::Render,
  record::DetectionRecord,
  wire::DetectionsPayload,
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 以 `{"detections": [...]}` 的形式写入文件
pub struct JsonRecordOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  /// `json:///path/to/detections.json`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self {
      path: PathBuf::from(url.path()),
    })
  }
}

impl Render for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, _frame: &Frame, records: &[DetectionRecord]) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let payload = DetectionsPayload {
      detections: records.to_vec(),
    };
    std::fs::write(&self.path, serde_json::to_vec_pretty(&payload)?)?;
    info!("保存 {} 条检测记录到: {}", records.len(), self.path.display());
    Ok(())
  }
}
