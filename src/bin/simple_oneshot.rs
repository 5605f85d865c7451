// 该文件是 Chongshi （虫识） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use chongshi::{
  FromUrl, Pipeline,
  config::PipelineConfig,
  input::{ImageFileInput, InputError},
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

/// 单张图像检测：记录输出到标准输出，标注图像写到输出地址
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器地址，yolo26:///model.rknn 或 https://detect.roboflow.com/...
  #[arg(long, value_name = "DETECTOR")]
  pub detector: Url,
  /// CLIP 模型目录，clip:///models/clip
  #[arg(long, value_name = "ENCODER")]
  pub encoder: Url,
  /// 输入图像，image:///path/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出地址，image:///path/out.jpg 或 json:///path/out.json
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// TOML 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 覆盖配置中的置信度阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut config = args.config.map(PipelineConfig::load).transpose()?.unwrap_or_default();
  if let Some(confidence) = args.confidence {
    config.confidence_threshold = confidence;
    config.validate()?;
  }

  let input = ImageFileInput::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_style(config.render.clone());
  let pipeline = Pipeline::from_urls(&args.detector, &args.encoder, config)?;

  let frames = std::iter::once(input.read_bytes().map_err(InputError::from));
  OneShotTask::new(std::io::stdout().lock()).run_task(frames, &pipeline, output)?;

  Ok(())
}
