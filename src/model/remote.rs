// 该文件是 Chongshi （虫识） 项目的一部分。
// src/model/remote.rs - 远程推理服务检测器
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

use std::io::Cursor;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  bbox::CenterBox,
  frame::Frame,
  model::{DetectResult, Detector, DetectorError, RawDetection},
};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const TIMEOUT_PARAM: &str = "timeout_ms";

/// 远程服务返回的单个预测，中心点形式
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrediction {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub confidence: f32,
  #[serde(default, rename = "class")]
  pub class_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteResponse {
  #[serde(default)]
  pub predictions: Vec<RemotePrediction>,
}

impl RemoteResponse {
  /// 映射为角点形式的候选框，保持服务端返回顺序
  pub fn into_detections(self) -> Vec<RawDetection> {
    self
      .predictions
      .into_iter()
      .map(|p| RawDetection {
        bbox: CenterBox {
          cx: p.x,
          cy: p.y,
          width: p.width,
          height: p.height,
        }
        .to_corner(),
        score: p.confidence,
      })
      .collect()
  }
}

/// 将图像转发给第三方推理服务（Roboflow 风格接口）
pub struct RemoteDetector {
  endpoint: Url,
  client: Client,
}

impl RemoteDetector {
  pub fn accepts(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  fn encode_body(frame: &Frame) -> Result<String, DetectorError> {
    let mut bytes = Vec::new();
    frame
      .as_rgb_image()
      .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)?;
    Ok(STANDARD.encode(bytes))
  }
}

impl FromUrl for RemoteDetector {
  type Error = DetectorError;

  /// `https://detect.roboflow.com/<model>/<version>?api_key=..&timeout_ms=10000`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !Self::accepts(url) {
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut timeout_ms = DEFAULT_TIMEOUT_MS;
    let mut endpoint = url.clone();
    let forwarded: Vec<(String, String)> = url
      .query_pairs()
      .filter_map(|(k, v)| {
        if k == TIMEOUT_PARAM {
          if let Ok(ms) = v.parse() {
            timeout_ms = ms;
          } else {
            warn!("忽略无效的超时参数: {}", v);
          }
          None
        } else {
          Some((k.into_owned(), v.into_owned()))
        }
      })
      .collect();
    endpoint.set_query(None);
    if !forwarded.is_empty() {
      endpoint.query_pairs_mut().extend_pairs(forwarded);
    }

    let client = Client::builder()
      .timeout(Duration::from_millis(timeout_ms))
      .build()
      .map_err(|e| DetectorError::Remote(e.to_string()))?;

    info!(
      "远程检测服务: {}://{}{}，超时 {}ms",
      endpoint.scheme(),
      endpoint.host_str().unwrap_or_default(),
      endpoint.path(),
      timeout_ms
    );

    Ok(Self { endpoint, client })
  }
}

impl Detector for RemoteDetector {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError> {
    let body = Self::encode_body(frame)?;
    debug!("发送远程检测请求，负载 {} 字节", body.len());

    let response = self
      .client
      .post(self.endpoint.clone())
      .header("Content-Type", "application/x-www-form-urlencoded")
      .body(body)
      .send()
      .map_err(|e| DetectorError::Remote(e.to_string()))?;

    let status = response.status();
    let text = response
      .text()
      .map_err(|e| DetectorError::Remote(e.to_string()))?;
    if !status.is_success() {
      warn!("远程检测服务返回错误状态: {}", status);
      return Err(DetectorError::RemoteStatus {
        status: status.as_u16(),
        body: text,
      });
    }

    let parsed: RemoteResponse = serde_json::from_str(&text)?;
    let items = parsed.into_detections();
    debug!("远程检测返回 {} 个候选框", items.len());
    Ok(items.into())
  }
}
