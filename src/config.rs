// 该文件是 Chongshi （虫识） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::classifier::{ClassifierError, PromptSet};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;

pub const DEFAULT_PROMPTS: [&str; 4] = [
  "a photo of a stem borer insect pest",
  "a photo of a pink bollworm moth pest",
  "a photo of a leaf folder caterpillar pest",
  "a photo of a healthy green plant leaf",
];

/// 无法可靠分类的检测结果使用的标签
pub const UNCLASSIFIED_LABEL: &str = "unclassified";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {0} 失败: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("配置项无效: {0}")]
  Invalid(String),
  #[error("提示集合无效: {0}")]
  Prompts(#[from] ClassifierError),
}

/// 子图过小时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclassifiedPolicy {
  /// 仍然输出，标签为 `unclassified`，分类置信度为 0
  #[default]
  Report,
  /// 直接丢弃
  Drop,
}

/// 标签背景超出图像上边缘时的放置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPlacement {
  /// 背景贴住图像上边缘
  #[default]
  Clamp,
  /// 放进框内，紧贴框的上边
  Inside,
  /// 保持在框上方，超出部分被裁掉
  Overflow,
}

/// 流式输入在处理期间积压帧的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
  /// 按到达顺序逐帧处理
  #[default]
  Queue,
  /// 丢弃积压的旧帧，只处理最新一帧
  Latest,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderStyle {
  pub stroke_color: [u8; 3],
  pub stroke_width: u32,
  pub label_background: [u8; 3],
  pub text_color: [u8; 3],
  /// 首选字体，加载失败时回退到内置字体
  pub font_path: Option<PathBuf>,
  pub font_size: f32,
  pub label_padding: u32,
  pub label_placement: LabelPlacement,
}

impl Default for RenderStyle {
  fn default() -> Self {
    Self {
      stroke_color: [255, 0, 0],
      stroke_width: 3,
      label_background: [255, 0, 0],
      text_color: [255, 255, 255],
      font_path: None,
      font_size: 20.0,
      label_padding: 5,
      label_placement: LabelPlacement::Clamp,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptConfig {
  pub labels: Vec<String>,
}

impl Default for PromptConfig {
  fn default() -> Self {
    Self {
      labels: DEFAULT_PROMPTS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
  pub backpressure: Backpressure,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  /// 检测置信度必须严格大于该值
  pub confidence_threshold: f32,
  /// 子图短边小于该值时视为无法分类
  pub min_crop_side: u32,
  pub unclassified: UnclassifiedPolicy,
  pub prompts: PromptConfig,
  pub render: RenderStyle,
  pub stream: StreamConfig,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      min_crop_side: 1,
      unclassified: UnclassifiedPolicy::default(),
      prompts: PromptConfig::default(),
      render: RenderStyle::default(),
      stream: StreamConfig::default(),
    }
  }
}

impl PipelineConfig {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("读取配置文件: {}", path.display());
    let text =
      std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    Self::from_toml_str(&text)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::Invalid(format!(
        "confidence_threshold 必须在 [0, 1] 内: {}",
        self.confidence_threshold
      )));
    }
    if self.render.stroke_width == 0 {
      return Err(ConfigError::Invalid("render.stroke_width 必须大于 0".into()));
    }
    if !(self.render.font_size > 0.0) {
      return Err(ConfigError::Invalid(format!(
        "render.font_size 必须大于 0: {}",
        self.render.font_size
      )));
    }
    self.prompt_set()?;
    Ok(())
  }

  pub fn prompt_set(&self) -> Result<PromptSet, ConfigError> {
    Ok(PromptSet::new(self.prompts.labels.iter().cloned())?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn empty_document_yields_defaults() {
    let config = PipelineConfig::from_toml_str("").unwrap();
    assert_eq!(config, PipelineConfig::default());
    assert_eq!(config.confidence_threshold, 0.3);
    assert_eq!(config.prompt_set().unwrap().len(), 4);
  }

  #[test]
  fn partial_document_overrides_fields() {
    let config = PipelineConfig::from_toml_str(
      r#"
      confidence_threshold = 0.5
      unclassified = "drop"

      [prompts]
      labels = ["a photo of a locust", "a photo of a leaf"]

      [render]
      stroke_width = 2
      label_placement = "inside"

      [stream]
      backpressure = "latest"
      "#,
    )
    .unwrap();
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.unclassified, UnclassifiedPolicy::Drop);
    assert_eq!(config.render.stroke_width, 2);
    assert_eq!(config.render.stroke_color, [255, 0, 0]);
    assert_eq!(config.render.label_placement, LabelPlacement::Inside);
    assert_eq!(config.stream.backpressure, Backpressure::Latest);
    assert_eq!(config.prompt_set().unwrap().get(0), Some("a photo of a locust"));
  }

  #[test]
  fn invalid_values_are_rejected() {
    assert!(matches!(
      PipelineConfig::from_toml_str("confidence_threshold = 1.5"),
      Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
      PipelineConfig::from_toml_str("[prompts]\nlabels = []"),
      Err(ConfigError::Prompts(_))
    ));
    assert!(matches!(
      PipelineConfig::from_toml_str("unknown_key = 1"),
      Err(ConfigError::Toml(_))
    ));
  }

  #[test]
  fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "min_crop_side = 8").unwrap();
    let config = PipelineConfig::load(file.path()).unwrap();
    assert_eq!(config.min_crop_side, 8);
  }

  #[test]
  fn load_reports_missing_file() {
    assert!(matches!(
      PipelineConfig::load("/nonexistent/chongshi.toml"),
      Err(ConfigError::Io(..))
    ));
  }
}
