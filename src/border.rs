// 该文件是 Caijian （裁剪） 项目的一部分。
// src/border.rs - 图像边框扩展
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

use std::{borrow::Cow, fmt, str::FromStr};

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::geometry::PixelBox;

/// 扩展后图像允许的最大像素数
const MAX_EXPANDED_PIXELS: u64 = 1 << 28;

#[derive(Error, Debug, PartialEq)]
pub enum BorderError {
  #[error("未知的扩展方向: {0}")]
  UnknownDirection(String),
  #[error("扩展后图像过大: {width}x{height}")]
  TooLarge { width: u64, height: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Left,
  Top,
  Right,
  Bottom,
}

impl FromStr for Direction {
  type Err = BorderError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "left" => Ok(Direction::Left),
      "top" => Ok(Direction::Top),
      "right" => Ok(Direction::Right),
      "bottom" => Ok(Direction::Bottom),
      other => Err(BorderError::UnknownDirection(other.to_string())),
    }
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Direction::Left => "left",
      Direction::Top => "top",
      Direction::Right => "right",
      Direction::Bottom => "bottom",
    };
    f.write_str(name)
  }
}

/// 在图像的一侧添加宽度为 `size` 的纯色边框，返回新图像
pub fn expand_image(
  image: &RgbImage,
  size: u64,
  direction: Direction,
  color: Rgb<u8>,
) -> Result<RgbImage, BorderError> {
  let (width, height) = (image.width() as u64, image.height() as u64);
  let (new_width, new_height, x, y) = match direction {
    Direction::Left => (width.saturating_add(size), height, size, 0),
    Direction::Top => (width, height.saturating_add(size), 0, size),
    Direction::Right => (width.saturating_add(size), height, 0, 0),
    Direction::Bottom => (width, height.saturating_add(size), 0, 0),
  };

  let too_large = BorderError::TooLarge {
    width: new_width,
    height: new_height,
  };
  if new_width.saturating_mul(new_height) > MAX_EXPANDED_PIXELS {
    return Err(too_large);
  }
  let (Ok(canvas_width), Ok(canvas_height)) = (u32::try_from(new_width), u32::try_from(new_height))
  else {
    return Err(too_large);
  };

  let mut canvas = RgbImage::from_pixel(canvas_width, canvas_height, color);
  imageops::replace(&mut canvas, image, x as i64, y as i64);
  Ok(canvas)
}

/// 依次检查左、上、右、下四个方向，必要时扩展图像，使其完整包含裁剪框
///
/// 每次扩展后都以扩展后的图像尺寸重新判断；左、上扩展会同步平移裁剪框。
pub fn expand_to_contain<'a>(
  image: Cow<'a, RgbImage>,
  bbox: PixelBox,
  color: Rgb<u8>,
) -> Result<(Cow<'a, RgbImage>, PixelBox), BorderError> {
  let mut image = image;
  let mut bbox = bbox;

  for direction in [
    Direction::Left,
    Direction::Top,
    Direction::Right,
    Direction::Bottom,
  ] {
    let size = match direction {
      Direction::Left => bbox.left.saturating_neg(),
      Direction::Top => bbox.top.saturating_neg(),
      Direction::Right => bbox.right.saturating_sub(image.width() as i64),
      Direction::Bottom => bbox.bottom.saturating_sub(image.height() as i64),
    };
    if size <= 0 {
      continue;
    }

    debug!("向 {} 扩展 {} 像素", direction, size);
    let expanded = expand_image(&image, size as u64, direction, color)?;
    match direction {
      Direction::Left => bbox = bbox.shift(size, 0),
      Direction::Top => bbox = bbox.shift(0, size),
      Direction::Right | Direction::Bottom => {}
    }
    image = Cow::Owned(expanded);
  }

  Ok((image, bbox))
}
