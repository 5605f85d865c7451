// 该文件是 Chongshi （虫识） 项目的一部分。
// src/classifier.rs - 零样本分类
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

//! 把检测框内的子图与一组固定的文本提示在同一嵌入空间中比较，
//! 选出相似度最高的提示作为标签。新增类别只需增加一条提示。

use std::sync::{Arc, Mutex, OnceLock};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

/// 相似度的温度缩放系数
pub const LOGIT_SCALE: f32 = 100.0;

const NORM_EPSILON: f32 = 1e-12;

#[derive(Error, Debug)]
pub enum EncoderError {
  #[error("模型推理错误: {0}")]
  Backend(String),
  #[error("分词错误: {0}")]
  Tokenizer(String),
  #[error("输出形状错误: {0}")]
  Shape(String),
}

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("提示集合为空")]
  EmptyPrompts,
  #[error("编码器错误: {0}")]
  Encoder(#[from] EncoderError),
  #[error("嵌入维度不一致: 图像 {image}, 文本 {text}")]
  DimensionMismatch { image: usize, text: usize },
  #[error("文本编码器返回 {got} 个向量，期望 {expected} 个")]
  PromptCountMismatch { expected: usize, got: usize },
  #[error("初始化锁已损坏")]
  Poisoned,
}

/// 图像与文本共享的嵌入模型
pub trait EmbeddingModel: Send + Sync {
  fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EncoderError>;
  fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncoderError>;
}

impl<M: EmbeddingModel + ?Sized> EmbeddingModel for Arc<M> {
  fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EncoderError> {
    (**self).embed_image(image)
  }

  fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncoderError> {
    (**self).embed_texts(texts)
  }
}

/// 有序且不可变的提示集合，下标在多次调用间保持稳定
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
  prompts: Arc<[String]>,
}

impl PromptSet {
  pub fn new<I, S>(prompts: I) -> Result<Self, ClassifierError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let prompts: Vec<String> = prompts.into_iter().map(Into::into).collect();
    if prompts.is_empty() {
      return Err(ClassifierError::EmptyPrompts);
    }
    Ok(Self {
      prompts: prompts.into(),
    })
  }

  pub fn len(&self) -> usize {
    self.prompts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.prompts.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.prompts.get(index).map(String::as_str)
  }

  pub fn as_slice(&self) -> &[String] {
    &self.prompts
  }
}

/// 每条提示的单位化嵌入
#[derive(Debug, Clone)]
pub struct PromptEmbeddings {
  vectors: Vec<Vec<f32>>,
  dim: usize,
}

impl PromptEmbeddings {
  pub fn new(vectors: Vec<Vec<f32>>) -> Result<Self, ClassifierError> {
    let dim = vectors.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
      return Err(ClassifierError::DimensionMismatch {
        image: dim,
        text: bad.len(),
      });
    }
    let vectors = vectors.into_iter().map(l2_normalized).collect();
    Ok(Self { vectors, dim })
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  pub fn len(&self) -> usize {
    self.vectors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.vectors.is_empty()
  }

  /// 温度缩放后的点积
  pub fn logits(&self, image_embedding: &[f32]) -> Vec<f32> {
    self
      .vectors
      .iter()
      .map(|text| LOGIT_SCALE * dot(text, image_embedding))
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
  pub index: usize,
  pub label: String,
  /// softmax 之后的概率
  pub score: f32,
  /// 每条提示的概率，和为 1
  pub probabilities: Vec<f32>,
}

pub trait Classifier: Send + Sync {
  fn classify(&self, crop: &RgbImage) -> Result<ClassificationResult, ClassifierError>;

  /// 在开始服务前完成一次性初始化
  fn warm_up(&self) -> Result<(), ClassifierError> {
    Ok(())
  }
}

pub struct ZeroShotClassifier<M> {
  prompts: PromptSet,
  model: M,
  embeddings: OnceLock<PromptEmbeddings>,
  init_lock: Mutex<()>,
}

impl<M: EmbeddingModel> ZeroShotClassifier<M> {
  pub fn new(prompts: PromptSet, model: M) -> Self {
    Self {
      prompts,
      model,
      embeddings: OnceLock::new(),
      init_lock: Mutex::new(()),
    }
  }

  pub fn prompts(&self) -> &PromptSet {
    &self.prompts
  }

  /// 首次调用时计算提示嵌入，之后只读共享
  pub fn prompt_embeddings(&self) -> Result<&PromptEmbeddings, ClassifierError> {
    if let Some(embeddings) = self.embeddings.get() {
      return Ok(embeddings);
    }

    let _guard = self.init_lock.lock().map_err(|_| ClassifierError::Poisoned)?;
    if let Some(embeddings) = self.embeddings.get() {
      return Ok(embeddings);
    }

    info!("计算 {} 条提示的文本嵌入", self.prompts.len());
    let vectors = self.model.embed_texts(self.prompts.as_slice())?;
    if vectors.len() != self.prompts.len() {
      return Err(ClassifierError::PromptCountMismatch {
        expected: self.prompts.len(),
        got: vectors.len(),
      });
    }
    let computed = PromptEmbeddings::new(vectors)?;
    debug!("文本嵌入维度: {}", computed.dim());

    Ok(self.embeddings.get_or_init(|| computed))
  }
}

impl<M: EmbeddingModel> Classifier for ZeroShotClassifier<M> {
  fn classify(&self, crop: &RgbImage) -> Result<ClassificationResult, ClassifierError> {
    let embeddings = self.prompt_embeddings()?;

    let image_embedding = l2_normalized(self.model.embed_image(crop)?);
    if image_embedding.len() != embeddings.dim() {
      return Err(ClassifierError::DimensionMismatch {
        image: image_embedding.len(),
        text: embeddings.dim(),
      });
    }

    let probabilities = softmax(&embeddings.logits(&image_embedding));
    let (index, score) = argmax(&probabilities).ok_or(ClassifierError::EmptyPrompts)?;
    let label = self
      .prompts
      .get(index)
      .ok_or(ClassifierError::EmptyPrompts)?
      .to_string();
    debug!("分类结果: {} ({:.4})", label, score);

    Ok(ClassificationResult {
      index,
      label,
      score,
      probabilities,
    })
  }

  fn warm_up(&self) -> Result<(), ClassifierError> {
    self.prompt_embeddings().map(|_| ())
  }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
  fn classify(&self, crop: &RgbImage) -> Result<ClassificationResult, ClassifierError> {
    (**self).classify(crop)
  }

  fn warm_up(&self) -> Result<(), ClassifierError> {
    (**self).warm_up()
  }
}

pub fn l2_normalized(mut v: Vec<f32>) -> Vec<f32> {
  let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm > NORM_EPSILON {
    v.iter_mut().for_each(|x| *x /= norm);
  }
  v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 数值稳定的 softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|x| x / sum).collect()
}

/// 最大值的下标；并列时取第一个
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
  values
    .iter()
    .copied()
    .enumerate()
    .fold(None, |best, (i, v)| match best {
      Some((_, b)) if b >= v => best,
      _ => Some((i, v)),
    })
}

#[cfg(feature = "clip_onnx")]
mod clip_onnx;
#[cfg(feature = "clip_onnx")]
pub use self::clip_onnx::{ClipOnnx, ClipOnnxBuilder, ClipOnnxError};
