// 该文件是 Caijian （裁剪） 项目的一部分。
// src/geometry.rs - 边界框几何变换
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

use image::{RgbImage, imageops};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
  #[error("边界框面积为零或为负: {0:?}")]
  Degenerate([f32; 4]),
  #[error("裁剪框面积为零: {0:?}")]
  EmptyCrop([i64; 4]),
  #[error("边界框坐标超出范围: {0:?}")]
  OutOfRange([f32; 4]),
}

/// 像素坐标绝对值上限，取整后的宽、高与边框扩展量都不会溢出 i64
pub const MAX_PIXEL_COORDINATE: f32 = (1u64 << 31) as f32;

/// 归一化边界框 (center_x, center_y, width, height)，取值为图像尺寸的比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
}

impl From<[f32; 4]> for NormalizedBox {
  fn from([cx, cy, w, h]: [f32; 4]) -> Self {
    Self { cx, cy, w, h }
  }
}

impl NormalizedBox {
  /// 转换为像素坐标
  pub fn to_pixels(&self, width: u32, height: u32) -> BoundingBox {
    let (width, height) = (width as f32, height as f32);
    BoundingBox::new(
      (self.cx - self.w / 2.0) * width,
      (self.cy - self.h / 2.0) * height,
      (self.cx + self.w / 2.0) * width,
      (self.cy + self.h / 2.0) * height,
    )
  }
}

/// 像素坐标边界框 [left, top, right, bottom]
///
/// 在边框扩展之前，坐标可以为负，也可以超出图像范围。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn center(&self) -> (f32, f32) {
    (
      (self.left + self.right) / 2.0,
      (self.top + self.bottom) / 2.0,
    )
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }

  /// 宽或高不为正（含 NaN）时视为退化
  pub fn is_degenerate(&self) -> bool {
    !(self.width() > 0.0 && self.height() > 0.0)
  }

  pub fn ensure_valid(self) -> Result<Self, GeometryError> {
    if self.is_degenerate() {
      return Err(GeometryError::Degenerate(self.to_array()));
    }
    Ok(self)
  }

  /// 四舍五入到整数像素，.5 向偶数取整
  ///
  /// 坐标非有限值或绝对值超过 [`MAX_PIXEL_COORDINATE`] 时返回 [`GeometryError::OutOfRange`]。
  pub fn round(&self) -> Result<PixelBox, GeometryError> {
    let coords = self.to_array();
    if coords
      .iter()
      .any(|c| !c.is_finite() || c.abs() > MAX_PIXEL_COORDINATE)
    {
      return Err(GeometryError::OutOfRange(coords));
    }
    Ok(PixelBox {
      left: self.left.round_ties_even() as i64,
      top: self.top.round_ties_even() as i64,
      right: self.right.round_ties_even() as i64,
      bottom: self.bottom.round_ties_even() as i64,
    })
  }
}

/// 整数像素边界框，用于边框扩展与裁剪
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub left: i64,
  pub top: i64,
  pub right: i64,
  pub bottom: i64,
}

impl PixelBox {
  pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> i64 {
    self.right.saturating_sub(self.left)
  }

  pub fn height(&self) -> i64 {
    self.bottom.saturating_sub(self.top)
  }

  pub fn is_empty(&self) -> bool {
    self.width() <= 0 || self.height() <= 0
  }

  pub fn to_array(&self) -> [i64; 4] {
    [self.left, self.top, self.right, self.bottom]
  }

  pub fn shift(&self, dx: i64, dy: i64) -> Self {
    Self::new(
      self.left + dx,
      self.top + dy,
      self.right + dx,
      self.bottom + dy,
    )
  }

  /// 是否完全位于 width x height 的图像内
  pub fn fits_in(&self, width: u32, height: u32) -> bool {
    self.left >= 0 && self.top >= 0 && self.right <= width as i64 && self.bottom <= height as i64
  }
}

/// 边界框缩放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
  /// 宽、高分别乘以缩放比例，保持长宽比
  #[default]
  Proportional,
  /// 宽、高增加相同的长度 `(ratio - 1) * min(w, h)`，长宽比会改变
  EqualExtend,
}

/// 以中心为基准缩放边界框
pub fn scale_bbox(bbox: BoundingBox, ratio: f32, mode: ScaleMode) -> BoundingBox {
  let (cx, cy) = bbox.center();
  let (w, h) = (bbox.width(), bbox.height());

  let (new_w, new_h) = match mode {
    ScaleMode::Proportional => (w * ratio, h * ratio),
    ScaleMode::EqualExtend => {
      let short = w.min(h);
      // 收缩时不能让任何一边变为负值
      let extend = ((ratio - 1.0) * short).max(-short);
      (w + extend, h + extend)
    }
  };

  BoundingBox::new(
    cx - new_w / 2.0,
    cy - new_h / 2.0,
    cx + new_w / 2.0,
    cy + new_h / 2.0,
  )
}

/// 将边界框较短的一边向两侧等量延伸，使宽高比为 4:3
pub fn change_size_to_4_3(bbox: BoundingBox) -> BoundingBox {
  let BoundingBox {
    mut left,
    mut top,
    mut right,
    mut bottom,
  } = bbox;
  let width = right - left;
  let height = bottom - top;

  if width < height / 3.0 * 4.0 {
    let extend = height / 3.0 * 4.0 - width;
    left -= extend / 2.0;
    right += extend - extend / 2.0;
  } else if height < width / 4.0 * 3.0 {
    let extend = width / 4.0 * 3.0 - height;
    top -= extend / 2.0;
    bottom += extend - extend / 2.0;
  }

  BoundingBox::new(left, top, right, bottom)
}

/// 将边界框映射到逆时针旋转 90° 后的坐标系，`image_width` 为旋转前的图像宽度
pub fn rotate_bbox(bbox: BoundingBox, image_width: f32) -> BoundingBox {
  BoundingBox::new(
    bbox.top,
    image_width - bbox.right,
    bbox.bottom,
    image_width - bbox.left,
  )
}

/// 图像逆时针旋转 90°，并同步变换边界框
pub fn rotate_image_and_bbox(image: &RgbImage, bbox: BoundingBox) -> (RgbImage, BoundingBox) {
  let width = image.width() as f32;
  // rotate270 为顺时针 270°，即逆时针 90°
  let rotated = imageops::rotate270(image);
  (rotated, rotate_bbox(bbox, width))
}
