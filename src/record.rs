// 该文件是 Chongshi （虫识） 项目的一部分。
// src/record.rs - 检测与分类结果合并
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
use tracing::debug;

use crate::{
  bbox::PixelBox,
  classifier::ClassificationResult,
  config::{UNCLASSIFIED_LABEL, UnclassifiedPolicy},
};

/// 对外输出的单条检测记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub bbox: [u32; 4],
  pub yolo_conf: f64,
  pub clip_conf: f64,
  pub label: String,
}

/// 通过阈值并裁剪后的检测，附带可能缺失的分类结果
#[derive(Debug, Clone)]
pub struct ClassifiedDetection {
  pub region: PixelBox,
  pub detection_score: f32,
  /// 子图过小无法分类时为 `None`
  pub classification: Option<ClassificationResult>,
}

/// 保留两位小数，只在输出边界调用
pub fn round2(value: f32) -> f64 {
  (value as f64 * 100.0).round() / 100.0
}

/// 合并为输出记录，保持检测器给出的顺序
pub fn aggregate<I>(items: I, policy: UnclassifiedPolicy) -> Vec<DetectionRecord>
where
  I: IntoIterator<Item = ClassifiedDetection>,
{
  items
    .into_iter()
    .filter_map(|item| {
      let (label, clip_conf) = match item.classification {
        Some(result) => (result.label, round2(result.score)),
        None if policy == UnclassifiedPolicy::Report => (UNCLASSIFIED_LABEL.to_string(), 0.0),
        None => {
          debug!("丢弃无法分类的检测: {:?}", item.region);
          return None;
        }
      };
      Some(DetectionRecord {
        bbox: item.region.to_array(),
        yolo_conf: round2(item.detection_score),
        clip_conf,
        label,
      })
    })
    .collect()
}
