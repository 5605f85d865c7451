// 该文件是 Chongshi （虫识） 项目的一部分。
// src/bin/simple_batch.rs - 批量图像检测
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
  task::{BatchTask, Task},
};
use tracing::info;

/// 批量检测：每张图像独立成功或失败，结果按输入顺序输出为 JSON 数组
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器地址
  #[arg(long, value_name = "DETECTOR")]
  pub detector: Url,
  /// CLIP 模型目录
  #[arg(long, value_name = "ENCODER")]
  pub encoder: Url,
  /// TOML 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 输入图像列表，image:///path/photo.jpg
  #[arg(value_name = "SOURCE", required = true)]
  pub inputs: Vec<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();
  info!("共 {} 张输入图像", args.inputs.len());

  let config = args.config.map(PipelineConfig::load).transpose()?.unwrap_or_default();
  let pipeline = Pipeline::from_urls(&args.detector, &args.encoder, config)?;

  let images = args.inputs.iter().map(|url| {
    ImageFileInput::from_url(url)
      .and_then(|input| input.read_bytes())
      .map_err(InputError::from)
  });
  BatchTask::new(std::io::stdout().lock()).run_task(images, &pipeline, ())?;

  Ok(())
}
