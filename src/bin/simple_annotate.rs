// 该文件是 Chongshi （虫识） 项目的一部分。
// src/bin/simple_annotate.rs - 按给定预测绘制图像
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

use std::{io::Read, path::PathBuf};

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::Parser;

use chongshi::{
  config::PipelineConfig,
  output::Draw,
  wire::{AnnotateRequest, AnnotateResponse},
};
use tracing::info;

/// 读取 AnnotateRequest JSON，输出带 base64 JPEG 的 AnnotateResponse JSON
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 请求文件，缺省时从标准输入读取
  #[arg(long, value_name = "REQUEST")]
  pub request: Option<PathBuf>,
  /// TOML 配置文件，只使用其中的 [render] 部分
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 另存一份 JPEG 文件
  #[arg(long, value_name = "FILE")]
  pub save: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();

  let config = args.config.map(PipelineConfig::load).transpose()?.unwrap_or_default();
  let text = match &args.request {
    Some(path) => std::fs::read_to_string(path)?,
    None => {
      let mut text = String::new();
      std::io::stdin().read_to_string(&mut text)?;
      text
    }
  };

  let response = match serde_json::from_str::<AnnotateRequest>(&text) {
    Ok(request) => {
      info!("收到 {} 个预测", request.predictions.len());
      Draw::new(config.render).respond(&request)
    }
    Err(e) => AnnotateResponse::Error {
      kind: "request".to_string(),
      message: e.to_string(),
    },
  };

  if let (Some(path), AnnotateResponse::Success { annotated_image_base64 }) = (&args.save, &response) {
    std::fs::write(path, STANDARD.decode(annotated_image_base64)?)?;
    info!("保存标注图像到: {}", path.display());
  }

  println!("{}", serde_json::to_string(&response)?);
  Ok(())
}
