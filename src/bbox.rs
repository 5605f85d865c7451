// 该文件是 Chongshi （虫识） 项目的一部分。
// src/bbox.rs - 边界框定义
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

/// 角点形式的边界框（浮点像素坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

/// 中心点形式的边界框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterBox {
  pub cx: f32,
  pub cy: f32,
  pub width: f32,
  pub height: f32,
}

/// 裁剪到图像范围内的整数像素框，坐标均为闭区间
///
/// 保证 `x1 < x2 < width`，`y1 < y2 < height`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl BoundingBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn from_array(bbox: [f32; 4]) -> Self {
    Self::new(bbox[0], bbox[1], bbox[2], bbox[3])
  }

  /// 交换颠倒的坐标，使 `x1 <= x2`、`y1 <= y2`
  pub fn normalized(self) -> Self {
    Self {
      x1: self.x1.min(self.x2),
      y1: self.y1.min(self.y2),
      x2: self.x1.max(self.x2),
      y2: self.y1.max(self.y2),
    }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn to_center(&self) -> CenterBox {
    CenterBox {
      cx: (self.x1 + self.x2) / 2.0,
      cy: (self.y1 + self.y2) / 2.0,
      width: self.width(),
      height: self.height(),
    }
  }

  /// 按比例缩放，用于把模型输入坐标映射回原图
  pub fn scale(&self, sx: f32, sy: f32) -> Self {
    Self {
      x1: self.x1 * sx,
      y1: self.y1 * sy,
      x2: self.x2 * sx,
      y2: self.y2 * sy,
    }
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// 将边界框裁剪到 `[0, width) x [0, height)`
  ///
  /// 裁剪后宽或高为零时返回 `None`，调用方应丢弃该检测。
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelBox> {
    if width == 0 || height == 0 {
      return None;
    }
    let b = self.normalized();
    if !(b.x1.is_finite() && b.y1.is_finite() && b.x2.is_finite() && b.y2.is_finite()) {
      return None;
    }

    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x1 = b.x1.floor().clamp(0.0, max_x) as u32;
    let y1 = b.y1.floor().clamp(0.0, max_y) as u32;
    let x2 = b.x2.floor().clamp(0.0, max_x) as u32;
    let y2 = b.y2.floor().clamp(0.0, max_y) as u32;

    if x1 >= x2 || y1 >= y2 {
      return None;
    }

    Some(PixelBox { x1, y1, x2, y2 })
  }
}

impl CenterBox {
  pub fn to_corner(&self) -> BoundingBox {
    BoundingBox {
      x1: self.cx - self.width / 2.0,
      y1: self.cy - self.height / 2.0,
      x2: self.cx + self.width / 2.0,
      y2: self.cy + self.height / 2.0,
    }
  }
}

impl From<CenterBox> for BoundingBox {
  fn from(center: CenterBox) -> Self {
    center.to_corner()
  }
}

impl From<PixelBox> for BoundingBox {
  fn from(pixel: PixelBox) -> Self {
    BoundingBox::new(
      pixel.x1 as f32,
      pixel.y1 as f32,
      pixel.x2 as f32,
      pixel.y2 as f32,
    )
  }
}

impl PixelBox {
  /// 闭区间宽度（像素数）
  pub fn width(&self) -> u32 {
    self.x2 - self.x1 + 1
  }

  pub fn height(&self) -> u32 {
    self.y2 - self.y1 + 1
  }

  pub fn to_array(&self) -> [u32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn center_and_corner_forms_convert() {
    let center = CenterBox {
      cx: 30.0,
      cy: 40.0,
      width: 20.0,
      height: 10.0,
    };
    let corner = BoundingBox::from(center);
    assert_eq!(corner, BoundingBox::new(20.0, 35.0, 40.0, 45.0));
    assert_eq!(corner.to_center(), center);
  }

  #[test]
  fn normalized_swaps_reversed_corners() {
    let b = BoundingBox::new(50.0, 60.0, 10.0, 20.0).normalized();
    assert_eq!(b, BoundingBox::new(10.0, 20.0, 50.0, 60.0));
  }

  #[test]
  fn clamp_keeps_inner_box() {
    let b = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
    let p = b.clamp_to(100, 100).unwrap();
    assert_eq!(p.to_array(), [10, 10, 50, 50]);
    assert_eq!(p.width(), 41);
  }

  #[test]
  fn clamp_pulls_overflowing_box_inside() {
    let b = BoundingBox::new(-20.0, 90.0, 130.0, 140.0);
    let p = b.clamp_to(100, 100).unwrap();
    assert_eq!(p.to_array(), [0, 90, 99, 99]);
  }

  #[test]
  fn clamp_drops_box_outside_image() {
    assert!(BoundingBox::new(120.0, 10.0, 150.0, 50.0).clamp_to(100, 100).is_none());
    assert!(BoundingBox::new(10.0, 10.0, 10.4, 50.0).clamp_to(100, 100).is_none());
    assert!(BoundingBox::new(f32::NAN, 0.0, 5.0, 5.0).clamp_to(100, 100).is_none());
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    assert_eq!(a.iou(&b), 0.0);
  }

  proptest! {
    #[test]
    fn clamped_box_lies_inside_image(
      x1 in -500.0f32..500.0,
      y1 in -500.0f32..500.0,
      x2 in -500.0f32..500.0,
      y2 in -500.0f32..500.0,
      w in 1u32..400,
      h in 1u32..400,
    ) {
      if let Some(p) = BoundingBox::new(x1, y1, x2, y2).clamp_to(w, h) {
        prop_assert!(p.x1 < p.x2 && p.y1 < p.y2);
        prop_assert!(p.x2 < w && p.y2 < h);
      }
    }
  }
}
