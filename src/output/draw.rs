// 该文件是 Caijian （裁剪） 项目的一部分。
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::geometry::BoundingBox;

/// 沿边界框向内绘制 `thickness` 像素宽的边框，超出图像的部分被裁掉
///
/// 坐标无法取整（非有限值或过大）时不绘制。
pub fn draw_bbox_outline(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
  let Ok(pixel) = bbox.round() else {
    return;
  };
  for t in 0..thickness as i64 {
    let width = pixel.width() - 2 * t;
    let height = pixel.height() - 2 * t;
    if width <= 0 || height <= 0 {
      break;
    }
    let (Ok(x), Ok(y), Ok(w), Ok(h)) = (
      i32::try_from(pixel.left + t),
      i32::try_from(pixel.top + t),
      u32::try_from(width),
      u32::try_from(height),
    ) else {
      break;
    };
    draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
  }
}

#[cfg(feature = "visualize")]
pub use self::label::{Draw, SYSTEM_FONT_CANDIDATES, find_font_file};

#[cfg(feature = "visualize")]
mod label {
  use std::path::{Path, PathBuf};

  use ab_glyph::{FontVec, PxScale};
  use image::{Rgb, RgbImage};
  use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
  use imageproc::rect::Rect;

  use super::draw_bbox_outline;
  use crate::model::{DetectItem, DetectResult, LabelMap};

  // 文本渲染常量
  const LABEL_FONT_SIZE: f32 = 20.0;
  const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
  const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
  const PALETTE_SIZE: u32 = 16;

  /// 未指定字体时依次尝试的常见系统字体
  pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
  ];

  /// 返回第一个存在的字体文件
  pub fn find_font_file<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
      .iter()
      .map(|p| p.as_ref())
      .find(|p| p.is_file())
      .map(Path::to_path_buf)
  }

  /// 在图像上绘制检测框与 “类别: 置信度” 标签
  pub struct Draw {
    font: Option<FontVec>,
    font_size: f32,
    thickness: u32,
    colors: Vec<Rgb<u8>>,
  }

  impl Default for Draw {
    fn default() -> Self {
      Self::new(None, 3)
    }
  }

  impl Draw {
    /// 没有字体时只绘制边框
    pub fn new(font: Option<FontVec>, thickness: u32) -> Self {
      let colors = (0..PALETTE_SIZE)
        .map(|i| hsv_to_rgb(i as f32 / PALETTE_SIZE as f32 * 360.0, 0.8, 0.9))
        .collect();
      Self {
        font,
        font_size: LABEL_FONT_SIZE,
        thickness,
        colors,
      }
    }

    pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
      self.colors[class_id as usize % self.colors.len()]
    }

    fn draw_item(&self, image: &mut RgbImage, item: &DetectItem, labels: &LabelMap) {
      let color = self.color_of(item.class_id);
      draw_bbox_outline(image, &item.bbox, color, self.thickness);

      let Some(font) = self.font.as_ref() else {
        return;
      };

      let label = format!("{}: {:.2}", labels.label(item.class_id), item.score);
      let scale = PxScale::from(self.font_size);
      let (text_width, text_height) = text_size(scale, font, &label);

      let (w, h) = (image.width() as i32, image.height() as i32);
      let label_x = (item.bbox.left.round() as i32).clamp(0, (w - 1).max(0));
      let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;
      let label_y = (item.bbox.top.round() as i32)
        .saturating_sub(label_height)
        .clamp(0, (h - 1).max(0));

      // 确保标签不超出图像边界
      let label_width = (text_width as i32).min(w - label_x);
      let label_height = label_height.min(h - label_y);
      if label_width <= 0 || label_height <= 0 {
        return;
      }

      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        &label,
      );
    }

    /// 在图像副本上绘制全部检测结果
    pub fn draw_detections(
      &self,
      image: &RgbImage,
      result: &DetectResult,
      labels: &LabelMap,
    ) -> RgbImage {
      let mut canvas = image.clone();
      for item in result.items.iter() {
        self.draw_item(&mut canvas, item, labels);
      }
      canvas
    }
  }

  /// HSV 转 RGB
  fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
      (c, x, 0.0)
    } else if h < 120.0 {
      (x, c, 0.0)
    } else if h < 180.0 {
      (0.0, c, x)
    } else if h < 240.0 {
      (0.0, x, c)
    } else if h < 300.0 {
      (x, 0.0, c)
    } else {
      (c, 0.0, x)
    };

    Rgb([
      ((r + m) * 255.0) as u8,
      ((g + m) * 255.0) as u8,
      ((b + m) * 255.0) as u8,
    ])
  }

  #[cfg(test)]
  mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    #[test]
    fn draws_boxes_without_font() {
      let image = RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]));
      let result = DetectResult::from(vec![DetectItem {
        class_id: 0,
        score: 0.95,
        bbox: BoundingBox::new(10.0, 10.0, 30.0, 30.0),
      }]);

      let draw = Draw::new(None, 1);
      let canvas = draw.draw_detections(&image, &result, &LabelMap::default());
      assert_eq!(canvas.get_pixel(10, 10), &draw.color_of(0));
      assert_eq!(canvas.get_pixel(20, 20), &Rgb([0, 0, 0]));
      // 原图不变
      assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn first_existing_font_is_chosen() {
      let dir = tempfile::tempdir().unwrap();
      let present = dir.path().join("Sans.ttf");
      std::fs::write(&present, b"ttf").unwrap();
      let candidates = [dir.path().join("Missing.ttf"), dir.path().to_path_buf(), present.clone()];

      assert_eq!(find_font_file(&candidates), Some(present));
      assert_eq!(find_font_file(&candidates[..2]), None);
    }

    #[test]
    fn huge_detection_is_not_drawn() {
      let image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
      let result = DetectResult::from(vec![DetectItem {
        class_id: 0,
        score: 0.95,
        bbox: BoundingBox::new(-1e20, -1e20, 1e20, 1e20),
      }]);
      let canvas = Draw::new(None, 2).draw_detections(&image, &result, &LabelMap::default());
      assert_eq!(canvas, image);
    }

    #[test]
    fn palette_wraps_around() {
      let draw = Draw::default();
      assert_eq!(draw.color_of(1), draw.color_of(1 + PALETTE_SIZE));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const RED: Rgb<u8> = Rgb([255, 0, 0]);

  #[test]
  fn outline_is_drawn_inward() {
    let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
    draw_bbox_outline(&mut image, &BoundingBox::new(2.0, 2.0, 12.0, 12.0), RED, 2);

    assert_eq!(image.get_pixel(2, 2), &RED);
    assert_eq!(image.get_pixel(3, 3), &RED);
    assert_eq!(image.get_pixel(11, 11), &RED);
    assert_eq!(image.get_pixel(4, 4), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(1, 1), &Rgb([0, 0, 0]));
  }

  #[test]
  fn outline_outside_image_is_clipped() {
    let mut image = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
    draw_bbox_outline(&mut image, &BoundingBox::new(-5.0, -5.0, 5.0, 5.0), RED, 1);
    assert_eq!(image.get_pixel(4, 0), &RED);
    assert_eq!(image.get_pixel(0, 4), &RED);
    assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
  }

  #[test]
  fn huge_outline_is_ignored() {
    let mut image = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
    draw_bbox_outline(&mut image, &BoundingBox::new(-1e30, -1e30, 1e30, 1e30), RED, 3);
    assert!(image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }
}
