// 该文件是 Chongshi （虫识） 项目的一部分。
// src/classifier/clip_onnx.rs - 基于 ONNX Runtime 的 CLIP 嵌入模型
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
use std::sync::Mutex;

use image::{RgbImage, imageops::FilterType};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use thiserror::Error;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  classifier::{EmbeddingModel, EncoderError},
};

const CLIP_INPUT_SIZE: u32 = 224;
const CLIP_CONTEXT_LENGTH: usize = 77;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

const DEFAULT_VISUAL: &str = "visual.onnx";
const DEFAULT_TEXTUAL: &str = "textual.onnx";
const DEFAULT_TOKENIZER: &str = "tokenizer.json";

#[derive(Error, Debug)]
pub enum ClipOnnxError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型文件不存在: {0}")]
  MissingFile(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(String),
  #[error("分词器错误: {0}")]
  Tokenizer(String),
  #[error("模型缺少输入或输出: {0}")]
  Signature(String),
  #[error("输出形状错误: {0:?}")]
  Shape(Vec<i64>),
  #[error("推理会话锁已损坏")]
  Poisoned,
}

impl From<ClipOnnxError> for EncoderError {
  fn from(err: ClipOnnxError) -> Self {
    match err {
      ClipOnnxError::Tokenizer(msg) => EncoderError::Tokenizer(msg),
      ClipOnnxError::Shape(shape) => EncoderError::Shape(format!("{:?}", shape)),
      other => EncoderError::Backend(other.to_string()),
    }
  }
}

fn ort_error<E: std::fmt::Display>(err: E) -> ClipOnnxError {
  ClipOnnxError::Ort(err.to_string())
}

struct OnnxGraph {
  session: Mutex<Session>,
  inputs: Vec<String>,
  output: String,
}

impl OnnxGraph {
  fn load(path: &Path) -> Result<Self, ClipOnnxError> {
    if !path.exists() {
      return Err(ClipOnnxError::MissingFile(path.to_path_buf()));
    }
    info!("加载 ONNX 模型: {}", path.display());

    let session = Session::builder()
      .map_err(ort_error)?
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(ort_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error)?
      .with_intra_threads(4)
      .map_err(ort_error)?
      .commit_from_file(path)
      .map_err(ort_error)?;

    let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
    let output = session
      .outputs
      .first()
      .map(|o| o.name.clone())
      .ok_or_else(|| ClipOnnxError::Signature(path.display().to_string()))?;
    if inputs.is_empty() {
      return Err(ClipOnnxError::Signature(path.display().to_string()));
    }
    debug!("模型输入: {:?}, 输出: {}", inputs, output);

    Ok(Self {
      session: Mutex::new(session),
      inputs,
      output,
    })
  }

  fn input(&self, name: &str) -> Option<&str> {
    self
      .inputs
      .iter()
      .find(|i| i.as_str() == name)
      .map(String::as_str)
  }
}

/// CLIP 视觉与文本编码器（两个 ONNX 图 + HuggingFace 分词器）
pub struct ClipOnnx {
  visual: OnnxGraph,
  textual: OnnxGraph,
  tokenizer: Tokenizer,
}

impl std::fmt::Debug for ClipOnnx {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClipOnnx")
      .field("visual_inputs", &self.visual.inputs)
      .field("textual_inputs", &self.textual.inputs)
      .finish_non_exhaustive()
  }
}

pub struct ClipOnnxBuilder {
  visual: PathBuf,
  textual: PathBuf,
  tokenizer: PathBuf,
}

impl FromUrlWithScheme for ClipOnnxBuilder {
  const SCHEME: &'static str = "clip";
}

impl FromUrl for ClipOnnxBuilder {
  type Error = ClipOnnxError;

  /// `clip:///models/clip?visual=visual.onnx&textual=textual.onnx&tokenizer=tokenizer.json`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ClipOnnxError::SchemeMismatch(url.scheme().to_string()));
    }

    let dir = PathBuf::from(url.path());
    let mut builder = ClipOnnxBuilder {
      visual: dir.join(DEFAULT_VISUAL),
      textual: dir.join(DEFAULT_TEXTUAL),
      tokenizer: dir.join(DEFAULT_TOKENIZER),
    };
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "visual" => builder.visual = dir.join(value.as_ref()),
        "textual" => builder.textual = dir.join(value.as_ref()),
        "tokenizer" => builder.tokenizer = dir.join(value.as_ref()),
        _ => {}
      }
    }
    Ok(builder)
  }
}

impl ClipOnnxBuilder {
  pub fn build(self) -> Result<ClipOnnx, ClipOnnxError> {
    let visual = OnnxGraph::load(&self.visual)?;
    let textual = OnnxGraph::load(&self.textual)?;
    if !self.tokenizer.exists() {
      return Err(ClipOnnxError::MissingFile(self.tokenizer));
    }
    let mut tokenizer =
      Tokenizer::from_file(&self.tokenizer).map_err(|e| ClipOnnxError::Tokenizer(e.to_string()))?;
    // 截断时保留起止符
    tokenizer
      .with_truncation(Some(TruncationParams {
        max_length: CLIP_CONTEXT_LENGTH,
        ..TruncationParams::default()
      }))
      .map_err(|e| ClipOnnxError::Tokenizer(e.to_string()))?;
    info!("CLIP 模型加载完成");

    Ok(ClipOnnx {
      visual,
      textual,
      tokenizer,
    })
  }
}

/// 短边缩放到 224，中心裁剪，按通道标准化，输出 NCHW
pub fn preprocess(image: &RgbImage) -> Vec<f32> {
  let (w, h) = image.dimensions();
  let scale = CLIP_INPUT_SIZE as f32 / w.min(h).max(1) as f32;
  let rw = ((w as f32 * scale).round() as u32).max(CLIP_INPUT_SIZE);
  let rh = ((h as f32 * scale).round() as u32).max(CLIP_INPUT_SIZE);
  let resized = image::imageops::resize(image, rw, rh, FilterType::CatmullRom);
  let left = (rw - CLIP_INPUT_SIZE) / 2;
  let top = (rh - CLIP_INPUT_SIZE) / 2;
  let cropped =
    image::imageops::crop_imm(&resized, left, top, CLIP_INPUT_SIZE, CLIP_INPUT_SIZE).to_image();

  let plane = (CLIP_INPUT_SIZE * CLIP_INPUT_SIZE) as usize;
  let mut data = vec![0.0f32; 3 * plane];
  for (idx, pixel) in cropped.pixels().enumerate() {
    for c in 0..3 {
      data[c * plane + idx] = (pixel[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
    }
  }
  data
}

fn rows(shape: &[i64], data: &[f32], expected_rows: usize) -> Result<Vec<Vec<f32>>, ClipOnnxError> {
  if shape.len() != 2 || shape[0] as usize != expected_rows || shape[1] <= 0 {
    return Err(ClipOnnxError::Shape(shape.to_vec()));
  }
  Ok(data.chunks(shape[1] as usize).map(<[f32]>::to_vec).collect())
}

/// 把分词结果按最长序列补齐成 `[batch, len]`，注意力掩码取自分词器
fn pack_tokens<'a, I>(encodings: I) -> (usize, Vec<i64>, Vec<i64>)
where
  I: Iterator<Item = (&'a [u32], &'a [u32])> + Clone,
{
  let len = encodings
    .clone()
    .map(|(ids, _)| ids.len())
    .max()
    .unwrap_or(0)
    .max(1);
  let batch = encodings.clone().count();
  let mut ids = vec![0i64; batch * len];
  let mut mask = vec![0i64; batch * len];
  for (row, (row_ids, row_mask)) in encodings.enumerate() {
    for (col, (&id, &m)) in row_ids.iter().zip(row_mask).enumerate() {
      ids[row * len + col] = id as i64;
      mask[row * len + col] = m as i64;
    }
  }
  (len, ids, mask)
}

impl ClipOnnx {
  fn image_embedding(&self, image: &RgbImage) -> Result<Vec<f32>, ClipOnnxError> {
    let size = CLIP_INPUT_SIZE as usize;
    let pixels = preprocess(image);
    let tensor = Tensor::from_array(([1usize, 3, size, size], pixels.into_boxed_slice()))
      .map_err(ort_error)?;

    let input = self.visual.inputs[0].as_str();
    let mut session = self
      .visual
      .session
      .lock()
      .map_err(|_| ClipOnnxError::Poisoned)?;
    let outputs = session
      .run(ort::inputs![input => tensor.into_dyn()])
      .map_err(ort_error)?;
    let (shape, data) = outputs[self.visual.output.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(ort_error)?;

    let mut embeddings = rows(shape, data, 1)?;
    embeddings.pop().ok_or(ClipOnnxError::Shape(shape.to_vec()))
  }

  fn text_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ClipOnnxError> {
    let encodings = self
      .tokenizer
      .encode_batch(texts.to_vec(), true)
      .map_err(|e| ClipOnnxError::Tokenizer(e.to_string()))?;

    let (len, ids, mask) = pack_tokens(
      encodings
        .iter()
        .map(|e| (e.get_ids(), e.get_attention_mask())),
    );

    let ids_name = self.textual.inputs[0].as_str();
    let ids = Tensor::from_array(([texts.len(), len], ids.into_boxed_slice()))
      .map_err(ort_error)?
      .into_dyn();
    let mut session = self
      .textual
      .session
      .lock()
      .map_err(|_| ClipOnnxError::Poisoned)?;

    let outputs = match self.textual.input("attention_mask") {
      Some(mask_name) => {
        let mask = Tensor::from_array(([texts.len(), len], mask.into_boxed_slice()))
          .map_err(ort_error)?
          .into_dyn();
        session
          .run(ort::inputs![ids_name => ids, mask_name => mask])
          .map_err(ort_error)?
      }
      None => session
        .run(ort::inputs![ids_name => ids])
        .map_err(ort_error)?,
    };
    let (shape, data) = outputs[self.textual.output.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(ort_error)?;
    rows(shape, data, texts.len())
  }
}

impl EmbeddingModel for ClipOnnx {
  fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EncoderError> {
    Ok(self.image_embedding(image)?)
  }

  fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncoderError> {
    Ok(self.text_embeddings(texts)?)
  }
}
