// 该文件是 Chongshi （虫识） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::bbox::{BoundingBox, PixelBox};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸为零")]
  Empty,
}

/// 解码后的 RGB 图像，创建后不可修改
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
}

impl Frame {
  /// 从编码后的字节（JPEG/PNG 等）解码
  pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    debug!("解码图像: {}x{}", image.width(), image.height());
    Self::try_from(image)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn as_rgb_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_rgb_image(self) -> RgbImage {
    self.image
  }

  /// 截取像素框内的子图（闭区间）
  pub fn crop(&self, region: &PixelBox) -> RgbImage {
    image::imageops::crop_imm(
      &self.image,
      region.x1,
      region.y1,
      region.width(),
      region.height(),
    )
    .to_image()
  }

  /// 裁剪边界框并截取子图，裁剪后面积为零时返回 `None`
  pub fn crop_box(&self, bbox: &BoundingBox) -> Option<(PixelBox, RgbImage)> {
    let region = bbox.clamp_to(self.width(), self.height())?;
    Some((region, self.crop(&region)))
  }
}

impl TryFrom<RgbImage> for Frame {
  type Error = FrameError;

  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    if image.width() == 0 || image.height() == 0 {
      return Err(FrameError::Empty);
    }
    Ok(Self { image })
  }
}

/// 固定尺寸的 NHWC 排布帧，作为检测模型的输入
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  /// 将任意尺寸的帧缩放到模型输入尺寸
  pub fn from_frame(frame: &Frame) -> Self {
    let resized = image::imageops::resize(frame.as_rgb_image(), W, H, FilterType::Triangle);
    // RgbImage 本身就是 HWC 排布
    Self {
      data: resized.into_raw().into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use std::io::Cursor;

  fn encoded_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decode_reads_dimensions() {
    let frame = Frame::decode(&encoded_png(32, 16)).unwrap();
    assert_eq!(frame.dimensions(), (32, 16));
  }

  #[test]
  fn decode_rejects_garbage() {
    let err = Frame::decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, FrameError::Decode(_)));
  }

  #[test]
  fn crop_box_extracts_inclusive_region() {
    let frame = Frame::try_from(RgbImage::new(100, 100)).unwrap();
    let (region, crop) = frame
      .crop_box(&BoundingBox::new(10.0, 20.0, 50.0, 30.0))
      .unwrap();
    assert_eq!(region.to_array(), [10, 20, 50, 30]);
    assert_eq!(crop.dimensions(), (41, 11));
  }

  #[test]
  fn crop_box_drops_degenerate_region() {
    let frame = Frame::try_from(RgbImage::new(100, 100)).unwrap();
    assert!(frame.crop_box(&BoundingBox::new(99.0, 0.0, 150.0, 50.0)).is_none());
  }

  #[test]
  fn nhwc_frame_has_model_shape() {
    let frame = Frame::try_from(RgbImage::new(37, 21)).unwrap();
    let nhwc = RgbNhwcFrame::<64, 48>::from_frame(&frame);
    assert_eq!(nhwc.as_nhwc().len(), 64 * 48 * 3);
    assert_eq!((nhwc.width(), nhwc.height(), nhwc.channels()), (64, 48, 3));
  }
}
