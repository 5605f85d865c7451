// 该文件是 Chongshi （虫识） 项目的一部分。
// src/prediction.rs - 统一的待绘制预测结构
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

use serde::{Deserialize, Serialize};

use crate::{
  bbox::{BoundingBox, CenterBox},
  record::DetectionRecord,
};

/// 标注器唯一接受的预测结构，框统一为角点形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PredictionWire", into = "CenterWire")]
pub struct Prediction {
  pub bbox: BoundingBox,
  pub label: String,
  pub confidence: f32,
}

impl Prediction {
  pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
    Self {
      bbox: bbox.normalized(),
      label: label.into(),
      confidence,
    }
  }

  /// 标签文本，置信度保留两位小数
  pub fn caption(&self) -> String {
    format!("{}: {:.2}", self.label, self.confidence)
  }
}

impl From<&DetectionRecord> for Prediction {
  fn from(record: &DetectionRecord) -> Self {
    let [x1, y1, x2, y2] = record.bbox;
    Prediction::new(
      BoundingBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32),
      record.label.clone(),
      record.clip_conf as f32,
    )
  }
}

// 入口处兼容的几种写法
#[derive(Deserialize)]
#[serde(untagged)]
enum PredictionWire {
  Record {
    bbox: [f32; 4],
    #[allow(dead_code)]
    yolo_conf: f32,
    clip_conf: f32,
    label: String,
  },
  Corner {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    #[serde(alias = "class", alias = "label")]
    class_name: String,
  },
  Center(CenterWire),
}

#[derive(Serialize, Deserialize)]
struct CenterWire {
  x: f32,
  y: f32,
  width: f32,
  height: f32,
  confidence: f32,
  #[serde(alias = "class")]
  class_name: String,
}

impl From<PredictionWire> for Prediction {
  fn from(wire: PredictionWire) -> Self {
    match wire {
      PredictionWire::Record {
        bbox,
        clip_conf,
        label,
        ..
      } => Prediction::new(BoundingBox::from_array(bbox), label, clip_conf),
      PredictionWire::Corner {
        x1,
        y1,
        x2,
        y2,
        confidence,
        class_name,
      } => Prediction::new(BoundingBox::new(x1, y1, x2, y2), class_name, confidence),
      PredictionWire::Center(c) => Prediction::new(
        CenterBox {
          cx: c.x,
          cy: c.y,
          width: c.width,
          height: c.height,
        }
        .to_corner(),
        c.class_name,
        c.confidence,
      ),
    }
  }
}

impl From<Prediction> for CenterWire {
  fn from(p: Prediction) -> Self {
    let c = p.bbox.to_center();
    CenterWire {
      x: c.cx,
      y: c.cy,
      width: c.width,
      height: c.height,
      confidence: p.confidence,
      class_name: p.label,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(json: &str) -> Prediction {
    serde_json::from_str(json).unwrap()
  }

  #[test]
  fn center_form_with_either_class_field() {
    let a = parse(r#"{"x": 30, "y": 30, "width": 40, "height": 40, "confidence": 0.8, "class_name": "borer"}"#);
    let b = parse(r#"{"x": 30, "y": 30, "width": 40, "height": 40, "confidence": 0.8, "class": "borer"}"#);
    assert_eq!(a, b);
    assert_eq!(a.bbox, BoundingBox::new(10.0, 10.0, 50.0, 50.0));
    assert_eq!(a.label, "borer");
  }

  #[test]
  fn corner_form_is_normalized() {
    let p = parse(r#"{"x1": 50, "y1": 60, "x2": 10, "y2": 20, "confidence": 0.5, "label": "moth"}"#);
    assert_eq!(p.bbox, BoundingBox::new(10.0, 20.0, 50.0, 60.0));
    assert_eq!(p.label, "moth");
  }

  #[test]
  fn detection_record_is_drawn_with_classifier_score() {
    let p = parse(
      r#"{"bbox": [10, 10, 50, 50], "yolo_conf": 0.9, "clip_conf": 0.75, "label": "leaf folder caterpillar pest"}"#,
    );
    assert_eq!(p.confidence, 0.75);
    assert_eq!(p.caption(), "leaf folder caterpillar pest: 0.75");
  }

  #[test]
  fn incomplete_object_is_rejected() {
    assert!(serde_json::from_str::<Prediction>(r#"{"x": 1, "y": 2, "confidence": 0.5}"#).is_err());
  }

  #[test]
  fn serializes_as_center_form() {
    let p = Prediction::new(BoundingBox::new(10.0, 10.0, 50.0, 30.0), "borer", 0.5);
    let value = serde_json::to_value(&p).unwrap();
    assert_eq!(value["x"], 30.0);
    assert_eq!(value["height"], 20.0);
    assert_eq!(value["class_name"], "borer");
    let back: Prediction = serde_json::from_value(value).unwrap();
    assert_eq!(back, p);
  }
}
