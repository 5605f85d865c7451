// 该文件是 Chongshi （虫识） 项目的一部分。
// src/input/data_url.rs - data URL 帧解析
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

#[derive(Error, Debug)]
pub enum DataUrlError {
  #[error("缺少 data: 前缀")]
  MissingPrefix,
  #[error("缺少逗号分隔的负载")]
  MissingPayload,
  #[error("媒体类型不是图像: {0}")]
  NotImage(String),
  #[error("只支持 base64 编码")]
  NotBase64,
  #[error("base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
}

/// 解析 `data:image/<type>;base64,<payload>`，返回编码后的图像字节
pub fn decode_data_url(message: &str) -> Result<Vec<u8>, DataUrlError> {
  let rest = message
    .trim()
    .strip_prefix("data:")
    .ok_or(DataUrlError::MissingPrefix)?;
  let (header, payload) = rest.split_once(',').ok_or(DataUrlError::MissingPayload)?;

  let mut params = header.split(';');
  let mime = params.next().unwrap_or_default().trim();
  if !mime.to_ascii_lowercase().starts_with("image/") {
    return Err(DataUrlError::NotImage(mime.to_string()));
  }
  if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
    return Err(DataUrlError::NotBase64);
  }

  let payload: String = payload.split_ascii_whitespace().collect();
  Ok(STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_image_payload() {
    let bytes = decode_data_url("data:image/jpeg;base64,AQID\n").unwrap();
    assert_eq!(bytes, vec![1, 2, 3]);
  }

  #[test]
  fn accepts_line_wrapped_payload() {
    let bytes = decode_data_url("data:image/png;base64,AQID\r\nBAUG\n").unwrap();
    assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn rejects_malformed_messages() {
    assert!(matches!(decode_data_url("hello"), Err(DataUrlError::MissingPrefix)));
    assert!(matches!(
      decode_data_url("data:image/png;base64"),
      Err(DataUrlError::MissingPayload)
    ));
    assert!(matches!(
      decode_data_url("data:text/plain;base64,AQID"),
      Err(DataUrlError::NotImage(_))
    ));
    assert!(matches!(
      decode_data_url("data:image/png,AQID"),
      Err(DataUrlError::NotBase64)
    ));
    assert!(matches!(
      decode_data_url("data:image/png;base64,@@@"),
      Err(DataUrlError::Base64(_))
    ));
  }
}
