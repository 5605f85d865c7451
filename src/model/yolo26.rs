// 该文件是 Chongshi （虫识） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 本地检测器
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

use std::sync::Mutex;

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  bbox::BoundingBox,
  frame::{Frame, RgbNhwcFrame},
  model::{DetectResult, Detector, DetectorError, RawDetection, nms},
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_INPUT_W: u32 = 640;
const YOLO26_INPUT_H: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
// 与常见 YOLO 推理默认值一致，真正的业务阈值由流水线决定
const YOLO26_CANDIDATE_FLOOR: f32 = 0.25;
const YOLO26_NMS_IOU: f32 = 0.7;

type Yolo26Input = RgbNhwcFrame<YOLO26_INPUT_W, YOLO26_INPUT_H>;

pub struct Yolo26 {
  context: Mutex<Context>,
  class_num: usize,
  candidate_floor: f32,
  nms_iou: f32,
}

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理上下文锁已损坏")]
  Poisoned,
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Builder {
  model_path: String,
  flags: InitFlags,
  class_num: usize,
  candidate_floor: f32,
  nms_iou: f32,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  /// `yolo26:///path/model.rknn?classes=4&floor=0.25&iou=0.7`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = Yolo26Builder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      class_num: 1,
      candidate_floor: YOLO26_CANDIDATE_FLOOR,
      nms_iou: YOLO26_NMS_IOU,
    };

    for (key, value) in url.query_pairs() {
      let invalid = || Yolo26Error::ModelPathError(format!("参数 {} 无效: {}", key, value));
      match key.as_ref() {
        "classes" => builder.class_num = value.parse().map_err(|_| invalid())?,
        "floor" => builder.candidate_floor = value.parse().map_err(|_| invalid())?,
        "iou" => builder.nms_iou = value.parse().map_err(|_| invalid())?,
        _ => {}
      }
    }

    if builder.class_num == 0 {
      return Err(Yolo26Error::ModelPathError("类别数量必须大于 0".to_string()));
    }

    Ok(builder)
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path);
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成，类别数量: {}", self.class_num);
    Ok(Yolo26 {
      context: Mutex::new(context),
      class_num: self.class_num,
      candidate_floor: self.candidate_floor,
      nms_iou: self.nms_iou,
    })
  }
}

/// 根据张量大小匹配回归和分类输出
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

/// 解码单个检测头，输出归一化坐标与类别
fn decode_head(
  reg: &[f32],
  cls: &[f32],
  (map_h, map_w): (usize, usize),
  stride: f32,
  class_num: usize,
  floor: f32,
  items: &mut Vec<(RawDetection, u32)>,
) {
  let spatial = map_h * map_w;
  let (in_w, in_h) = (YOLO26_INPUT_W as f32, YOLO26_INPUT_H as f32);

  for h in 0..map_h {
    for w in 0..map_w {
      let idx = h * map_w + w;

      let (max_logit, class_id) = (0..class_num)
        .map(|c| (cls[c * spatial + idx], c as u32))
        .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
      let score = sigmoid(max_logit);
      if score <= floor {
        continue;
      }

      let grid_x = (w as f32) + 0.5;
      let grid_y = (h as f32) + 0.5;
      let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, in_w);
      let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, in_h);
      let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, in_w);
      let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, in_h);

      items.push((
        RawDetection {
          bbox: BoundingBox::new(xmin / in_w, ymin / in_h, xmax / in_w, ymax / in_h),
          score,
        },
        class_id,
      ));
    }
  }
}

impl Yolo26 {
  fn infer(&self, input: &Yolo26Input) -> Result<Vec<(RawDetection, u32)>, Yolo26Error> {
    let context = self.context.lock().map_err(|_| Yolo26Error::Poisoned)?;

    debug!("设置模型输入");
    context.set_input(
      0,
      input.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    context.run()?;

    let output = context.get_outputs()?;
    let mut items = Vec::new();

    for (head_idx, (&head, stride)) in YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate() {
      let spatial = head.0 * head.1;
      // RKNN 输出顺序可能不同，按张量大小判断回归与分类
      let tensor1 = output.get_f32(head_idx * 2)?;
      let tensor2 = output.get_f32(head_idx * 2 + 1)?;
      let Some((reg, cls)) =
        match_reg_cls_tensors(tensor1, tensor2, 4 * spatial, self.class_num * spatial)
      else {
        error!(
          "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}",
          head_idx,
          tensor1.len(),
          tensor2.len()
        );
        continue;
      };
      decode_head(
        reg,
        cls,
        head,
        stride,
        self.class_num,
        self.candidate_floor,
        &mut items,
      );
    }

    Ok(items)
  }
}

impl Detector for Yolo26 {
  fn detect(&self, frame: &Frame) -> Result<DetectResult, DetectorError> {
    let input = Yolo26Input::from_frame(frame);
    let candidates = self
      .infer(&input)
      .map_err(|e| DetectorError::Inference(e.to_string()))?;
    debug!("候选框数量: {}", candidates.len());

    let (w, h) = (frame.width() as f32, frame.height() as f32);
    let items: Vec<RawDetection> = nms(candidates, self.nms_iou)
      .into_iter()
      .map(|det| RawDetection {
        bbox: det.bbox.scale(w, h),
        score: det.score,
      })
      .collect();
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into())
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
