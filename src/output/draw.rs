// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontArc, FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{debug, info, warn};

use crate::{
  bbox::PixelBox,
  config::{LabelPlacement, RenderStyle},
  frame::Frame,
  prediction::Prediction,
};

// 内置字体，配置字体不可用时使用
const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// 标注结果，总是与输入图像尺寸相同
#[derive(Debug, Clone)]
pub struct Annotation {
  pub image: RgbImage,
  pub drawn: usize,
  /// 裁剪后面积为零而跳过的预测数量
  pub skipped: usize,
}

/// 标签背景与文字的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelLayout {
  pub background: (i32, i32, u32, u32),
  pub text: (i32, i32),
}

pub struct Draw {
  style: RenderStyle,
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(RenderStyle::default())
  }
}

fn load_font(path: Option<&Path>) -> Option<FontArc> {
  if let Some(path) = path {
    match std::fs::read(path) {
      Ok(bytes) => match FontVec::try_from_vec(bytes) {
        Ok(font) => {
          info!("使用字体: {}", path.display());
          return Some(FontArc::new(font));
        }
        Err(e) => warn!("字体文件 {} 无效: {}，使用内置字体", path.display(), e),
      },
      Err(e) => warn!("无法读取字体 {}: {}，使用内置字体", path.display(), e),
    }
  }

  match FontArc::try_from_slice(EMBEDDED_FONT) {
    Ok(font) => Some(font),
    Err(e) => {
      // 只画背景，不画文字
      warn!("内置字体加载失败: {}", e);
      None
    }
  }
}

impl Draw {
  pub fn new(style: RenderStyle) -> Self {
    let font = load_font(style.font_path.as_deref());
    Self { style, font }
  }

  pub fn style(&self) -> &RenderStyle {
    &self.style
  }

  /// 在图像副本上绘制所有预测，输入图像保持不变
  pub fn annotate(&self, frame: &Frame, predictions: &[Prediction]) -> Annotation {
    let mut image = frame.as_rgb_image().clone();
    let mut drawn = 0;
    let mut skipped = 0;

    for prediction in predictions {
      if self.draw_prediction(&mut image, prediction) {
        drawn += 1;
      } else {
        skipped += 1;
      }
    }

    debug!("绘制 {} 个预测，跳过 {} 个", drawn, skipped);
    Annotation {
      image,
      drawn,
      skipped,
    }
  }

  /// 绘制单个预测；框退化时不绘制并返回 `false`
  pub fn draw_prediction(&self, image: &mut RgbImage, prediction: &Prediction) -> bool {
    let Some(region) = prediction.bbox.clamp_to(image.width(), image.height()) else {
      debug!("跳过退化的预测框: {:?}", prediction.bbox);
      return false;
    };

    self.draw_outline(image, &region);

    let caption = prediction.caption();
    let (text_w, text_h) = self.measure(&caption);
    let layout = label_layout(
      &region,
      (text_w, text_h),
      self.style.label_padding,
      self.style.label_placement,
    );

    let (bg_x, bg_y, bg_w, bg_h) = layout.background;
    draw_filled_rect_mut(
      image,
      Rect::at(bg_x, bg_y).of_size(bg_w, bg_h),
      Rgb(self.style.label_background),
    );

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(self.style.text_color),
        layout.text.0,
        layout.text.1,
        self.scale(),
        font,
        &caption,
      );
    }

    true
  }

  fn scale(&self) -> PxScale {
    PxScale::from(self.style.font_size)
  }

  /// 文字的像素宽高，字体不可用时按字号粗略估计
  pub fn measure(&self, text: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(self.scale(), font, text),
      None => {
        let size = self.style.font_size.max(1.0);
        ((text.chars().count() as f32 * size * 0.5) as u32, size as u32)
      }
    }
  }

  // 由外向内逐像素收缩，得到指定宽度的边框
  fn draw_outline(&self, image: &mut RgbImage, region: &PixelBox) {
    let color = Rgb(self.style.stroke_color);
    for t in 0..self.style.stroke_width {
      let (w, h) = (region.width(), region.height());
      if w <= 2 * t || h <= 2 * t {
        break;
      }
      let rect = Rect::at((region.x1 + t) as i32, (region.y1 + t) as i32).of_size(w - 2 * t, h - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}

/// 计算标签背景与文字位置，背景紧贴框的上边
pub fn label_layout(
  region: &PixelBox,
  (text_w, text_h): (u32, u32),
  padding: u32,
  placement: LabelPlacement,
) -> LabelLayout {
  let bg_w = text_w + 2 * padding;
  let bg_h = text_h + 2 * padding;
  let left = region.x1 as i32;
  let top = region.y1 as i32;
  let above = top - bg_h as i32;

  let bg_y = match placement {
    LabelPlacement::Clamp => above.max(0),
    LabelPlacement::Inside if above < 0 => top,
    LabelPlacement::Inside | LabelPlacement::Overflow => above,
  };

  LabelLayout {
    background: (left, bg_y, bg_w.max(1), bg_h.max(1)),
    text: (left + padding as i32, bg_y + padding as i32),
  }
}

/// 编码为 JPEG
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
  Ok(bytes)
}
