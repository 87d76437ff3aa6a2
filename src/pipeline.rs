// 该文件是 Caijian （裁剪） 项目的一部分。
// src/pipeline.rs - 单张图像的裁剪流程
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

use std::{borrow::Cow, fmt};

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::{
  border::{BorderError, expand_to_contain},
  extract::{ExtractError, bbox_from_output},
  geometry::{
    BoundingBox, GeometryError, PixelBox, ScaleMode, change_size_to_4_3, rotate_image_and_bbox,
    scale_bbox,
  },
  input::SourceImage,
  model::DetrOutput,
  output::{ManifestEntry, draw::draw_bbox_outline},
};

const BBOX_OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("裁剪比例必须为非负数: {0}")]
  InvalidCropRatio(f32),
  #[error("边框宽度必须大于 0")]
  ZeroBboxWidth,
  #[error("最低置信度必须位于 [0, 1]: {0}")]
  InvalidMinConfidence(f32),
}

/// 一次运行的裁剪参数
#[derive(Debug, Clone, PartialEq)]
pub struct CropConfig {
  pub crop_ratio: f32,
  pub scale_mode: ScaleMode,
  pub fix_ratio: bool,
  pub rotate_image: bool,
  pub background_color: Rgb<u8>,
  pub show_bbox: bool,
  pub width_of_bbox: u32,
  pub min_confidence: f32,
}

impl Default for CropConfig {
  fn default() -> Self {
    Self {
      crop_ratio: 1.4,
      scale_mode: ScaleMode::Proportional,
      fix_ratio: false,
      rotate_image: false,
      background_color: Rgb([234, 242, 245]),
      show_bbox: false,
      width_of_bbox: 3,
      min_confidence: 0.0,
    }
  }
}

impl CropConfig {
  pub fn with_crop_ratio(mut self, crop_ratio: f32) -> Self {
    self.crop_ratio = crop_ratio;
    self
  }

  pub fn with_scale_mode(mut self, scale_mode: ScaleMode) -> Self {
    self.scale_mode = scale_mode;
    self
  }

  pub fn with_fix_ratio(mut self, fix_ratio: bool) -> Self {
    self.fix_ratio = fix_ratio;
    self
  }

  pub fn with_rotate_image(mut self, rotate_image: bool) -> Self {
    self.rotate_image = rotate_image;
    self
  }

  pub fn with_background_color(mut self, color: Rgb<u8>) -> Self {
    self.background_color = color;
    self
  }

  pub fn with_show_bbox(mut self, show_bbox: bool, width_of_bbox: u32) -> Self {
    self.show_bbox = show_bbox;
    self.width_of_bbox = width_of_bbox;
    self
  }

  pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
    self.min_confidence = min_confidence;
    self
  }

  pub fn validate(self) -> Result<Self, ConfigError> {
    if !self.crop_ratio.is_finite() || self.crop_ratio < 0.0 {
      return Err(ConfigError::InvalidCropRatio(self.crop_ratio));
    }
    if self.width_of_bbox == 0 {
      return Err(ConfigError::ZeroBboxWidth);
    }
    if !(0.0..=1.0).contains(&self.min_confidence) {
      return Err(ConfigError::InvalidMinConfidence(self.min_confidence));
    }
    Ok(self)
  }

  /// 仅在修正比例、允许旋转且框为竖向时旋转
  pub fn should_rotate(&self, bbox: &BoundingBox) -> bool {
    self.fix_ratio && self.rotate_image && bbox.height() > bbox.width()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropStage {
  Detected,
  BoxScaled,
  Rotated,
  RatioFixed,
  BorderExpanded,
  Cropped,
  Saved,
}

impl fmt::Display for CropStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CropStage::Detected => "检测",
      CropStage::BoxScaled => "缩放",
      CropStage::Rotated => "旋转",
      CropStage::RatioFixed => "比例修正",
      CropStage::BorderExpanded => "边框扩展",
      CropStage::Cropped => "裁剪",
      CropStage::Saved => "保存",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum CropError {
  #[error("提取检测框失败: {0}")]
  Extract(#[from] ExtractError),
  #[error("几何错误: {0}")]
  Geometry(#[from] GeometryError),
  #[error("边框扩展失败: {0}")]
  Border(#[from] BorderError),
  #[error("裁剪框 {bbox:?} 超出图像 {width}x{height}")]
  OutOfImage {
    bbox: [i64; 4],
    width: u32,
    height: u32,
  },
  #[error("无法从阶段 “{0}” 继续")]
  UnexpectedStage(CropStage),
}

/// 单张图像在裁剪流程中的状态
///
/// 工作图像在需要修改前借用源图像，源图像本身从不被修改。
#[derive(Debug)]
pub enum CropState<'a> {
  Detected {
    image: Cow<'a, RgbImage>,
    bbox: BoundingBox,
  },
  BoxScaled {
    image: Cow<'a, RgbImage>,
    bbox: BoundingBox,
  },
  Rotated {
    image: Cow<'a, RgbImage>,
    bbox: BoundingBox,
  },
  RatioFixed {
    image: Cow<'a, RgbImage>,
    bbox: PixelBox,
  },
  BorderExpanded {
    image: Cow<'a, RgbImage>,
    bbox: PixelBox,
  },
  Cropped {
    image: RgbImage,
  },
}

/// 比例修正（若开启）后取整
fn fix_and_round(config: &CropConfig, bbox: BoundingBox) -> Result<PixelBox, GeometryError> {
  let bbox = if config.fix_ratio {
    change_size_to_4_3(bbox)
  } else {
    bbox
  };
  let pixel = bbox.round()?;
  if pixel.is_empty() {
    return Err(GeometryError::EmptyCrop(pixel.to_array()));
  }
  Ok(pixel)
}

impl<'a> CropState<'a> {
  pub fn detected(image: &'a RgbImage, bbox: BoundingBox) -> Result<Self, GeometryError> {
    Ok(CropState::Detected {
      image: Cow::Borrowed(image),
      bbox: bbox.ensure_valid()?,
    })
  }

  pub fn stage(&self) -> CropStage {
    match self {
      CropState::Detected { .. } => CropStage::Detected,
      CropState::BoxScaled { .. } => CropStage::BoxScaled,
      CropState::Rotated { .. } => CropStage::Rotated,
      CropState::RatioFixed { .. } => CropStage::RatioFixed,
      CropState::BorderExpanded { .. } => CropStage::BorderExpanded,
      CropState::Cropped { .. } => CropStage::Cropped,
    }
  }

  pub fn is_cropped(&self) -> bool {
    matches!(self, CropState::Cropped { .. })
  }

  /// 前进到下一个阶段
  pub fn advance(self, config: &CropConfig) -> Result<Self, CropError> {
    match self {
      CropState::Detected { mut image, bbox } => {
        if config.show_bbox {
          draw_bbox_outline(
            image.to_mut(),
            &bbox,
            BBOX_OUTLINE_COLOR,
            config.width_of_bbox,
          );
        }
        let bbox = scale_bbox(bbox, config.crop_ratio, config.scale_mode).ensure_valid()?;
        Ok(CropState::BoxScaled { image, bbox })
      }
      CropState::BoxScaled { image, bbox } => {
        if config.should_rotate(&bbox) {
          let (image, bbox) = rotate_image_and_bbox(&image, bbox);
          Ok(CropState::Rotated {
            image: Cow::Owned(image),
            bbox,
          })
        } else {
          let bbox = fix_and_round(config, bbox)?;
          Ok(CropState::RatioFixed { image, bbox })
        }
      }
      CropState::Rotated { image, bbox } => {
        let bbox = fix_and_round(config, bbox)?;
        Ok(CropState::RatioFixed { image, bbox })
      }
      CropState::RatioFixed { image, bbox } => {
        let (image, bbox) = expand_to_contain(image, bbox, config.background_color)?;
        Ok(CropState::BorderExpanded { image, bbox })
      }
      CropState::BorderExpanded { image, bbox } => {
        let out_of_image = || CropError::OutOfImage {
          bbox: bbox.to_array(),
          width: image.width(),
          height: image.height(),
        };
        if !bbox.fits_in(image.width(), image.height()) {
          return Err(out_of_image());
        }
        let (Ok(x), Ok(y), Ok(w), Ok(h)) = (
          u32::try_from(bbox.left),
          u32::try_from(bbox.top),
          u32::try_from(bbox.width()),
          u32::try_from(bbox.height()),
        ) else {
          return Err(out_of_image());
        };
        let cropped = imageops::crop_imm(&*image, x, y, w, h).to_image();
        Ok(CropState::Cropped { image: cropped })
      }
      CropState::Cropped { .. } => Err(CropError::UnexpectedStage(CropStage::Cropped)),
    }
  }
}

/// 一张图像的裁剪结果
#[derive(Debug, Clone)]
pub struct CropOutcome {
  pub image: RgbImage,
  pub entry: ManifestEntry,
  pub score: f32,
}

/// 对单张图像执行 检测 → 缩放 → [旋转] → 比例修正 → 边框扩展 → 裁剪
///
/// 记录中的检测框为缩放后、旋转与比例修正前的值，尺寸为原图尺寸。
pub fn process_image(
  config: &CropConfig,
  source: &SourceImage,
  output: &DetrOutput,
) -> Result<CropOutcome, CropError> {
  let (width, height) = source.image.dimensions();
  let detected = bbox_from_output(output, width, height, config.min_confidence)?;

  let state = CropState::detected(&source.image, detected.bbox)?.advance(config)?;
  let entry = match &state {
    CropState::BoxScaled { bbox, .. } => ManifestEntry {
      filename: source.filename.clone(),
      original_size: (width, height),
      bbox: bbox.to_array(),
    },
    other => return Err(CropError::UnexpectedStage(other.stage())),
  };
  debug!("{}: {} {:?}", source.filename, state.stage(), entry.bbox);

  let mut state = state;
  while !state.is_cropped() {
    state = state.advance(config)?;
    debug!("{}: {}", source.filename, state.stage());
  }

  match state {
    CropState::Cropped { image } => Ok(CropOutcome {
      image,
      entry,
      score: detected.score,
    }),
    other => Err(CropError::UnexpectedStage(other.stage())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

  fn source(width: u32, height: u32) -> SourceImage {
    SourceImage {
      filename: "insect.jpg".to_string(),
      image: RgbImage::from_pixel(width, height, BLACK),
    }
  }

  fn single_query(bbox: [f32; 4]) -> DetrOutput {
    DetrOutput {
      logits: vec![vec![6.0, 0.0]],
      boxes: vec![bbox],
    }
  }

  fn run_to_end(mut state: CropState<'_>, config: &CropConfig) -> Vec<CropStage> {
    let mut stages = vec![state.stage()];
    while !state.is_cropped() {
      state = state.advance(config).unwrap();
      stages.push(state.stage());
    }
    stages
  }

  #[test]
  fn default_config_is_valid() {
    let config = CropConfig::default().validate().unwrap();
    assert_eq!(config.crop_ratio, 1.4);
    assert_eq!(config.background_color, Rgb([234, 242, 245]));
    assert_eq!(config.width_of_bbox, 3);
  }

  #[test]
  fn invalid_config_is_rejected() {
    assert_eq!(
      CropConfig::default().with_crop_ratio(-1.0).validate(),
      Err(ConfigError::InvalidCropRatio(-1.0))
    );
    assert!(matches!(
      CropConfig::default().with_crop_ratio(f32::NAN).validate(),
      Err(ConfigError::InvalidCropRatio(_))
    ));
    assert_eq!(
      CropConfig::default().with_show_bbox(true, 0).validate(),
      Err(ConfigError::ZeroBboxWidth)
    );
    assert_eq!(
      CropConfig::default().with_min_confidence(1.5).validate(),
      Err(ConfigError::InvalidMinConfidence(1.5))
    );
  }

  #[test]
  fn rotation_guard() {
    let tall = BoundingBox::new(0.0, 0.0, 10.0, 20.0);
    let wide = BoundingBox::new(0.0, 0.0, 20.0, 10.0);
    let config = CropConfig::default().with_fix_ratio(true).with_rotate_image(true);
    assert!(config.should_rotate(&tall));
    assert!(!config.should_rotate(&wide));
    assert!(!config.clone().with_fix_ratio(false).should_rotate(&tall));
    assert!(!config.with_rotate_image(false).should_rotate(&tall));
  }

  #[test]
  fn stages_without_rotation() {
    let image = RgbImage::new(100, 100);
    let state = CropState::detected(&image, BoundingBox::new(10.0, 10.0, 30.0, 50.0)).unwrap();
    let stages = run_to_end(state, &CropConfig::default());
    assert_eq!(
      stages,
      [
        CropStage::Detected,
        CropStage::BoxScaled,
        CropStage::RatioFixed,
        CropStage::BorderExpanded,
        CropStage::Cropped
      ]
    );
  }

  #[test]
  fn stages_with_rotation() {
    let image = RgbImage::new(100, 100);
    let config = CropConfig::default().with_fix_ratio(true).with_rotate_image(true);
    let state = CropState::detected(&image, BoundingBox::new(10.0, 10.0, 30.0, 50.0)).unwrap();
    let stages = run_to_end(state, &config);
    assert_eq!(stages[2], CropStage::Rotated);
    assert_eq!(stages.len(), 6);
  }

  #[test]
  fn fix_ratio_expands_left_with_background() {
    // 框 (0, 0, 40, 100) 修正为 (-46.67, 0, 86.67, 100)，取整为 (-47, 0, 87, 100)
    let config = CropConfig::default()
      .with_crop_ratio(1.0)
      .with_fix_ratio(true);
    let src = source(100, 100);
    let outcome = process_image(&config, &src, &single_query([0.2, 0.5, 0.4, 1.0])).unwrap();

    assert_eq!(outcome.image.dimensions(), (134, 100));
    assert_eq!(outcome.image.get_pixel(0, 50), &config.background_color);
    assert_eq!(outcome.image.get_pixel(46, 50), &config.background_color);
    assert_eq!(outcome.image.get_pixel(47, 50), &BLACK);
    assert_eq!(outcome.image.get_pixel(133, 50), &BLACK);

    assert_eq!(outcome.entry.filename, "insect.jpg");
    assert_eq!(outcome.entry.original_size, (100, 100));
    let expected = [0.0, 0.0, 40.0, 100.0];
    for (a, b) in outcome.entry.bbox.iter().zip(expected.iter()) {
      assert!((a - b).abs() < 1e-3);
    }
  }

  #[test]
  fn rotation_then_fix_ratio() {
    // 旋转后框为 (5, 70, 55, 90)，修正为 (5, 61.25, 55, 98.75)
    let config = CropConfig::default()
      .with_crop_ratio(1.0)
      .with_fix_ratio(true)
      .with_rotate_image(true);
    let image = RgbImage::new(100, 60);
    let mut state = CropState::detected(&image, BoundingBox::new(10.0, 5.0, 30.0, 55.0)).unwrap();
    while !state.is_cropped() {
      state = state.advance(&config).unwrap();
    }
    let CropState::Cropped { image: cropped } = state else {
      panic!("未完成裁剪");
    };
    assert_eq!(cropped.dimensions(), (50, 38));
  }

  #[test]
  fn manifest_box_is_scaled_before_correction() {
    let config = CropConfig::default().with_fix_ratio(true);
    let src = source(200, 200);
    let outcome = process_image(&config, &src, &single_query([0.5, 0.5, 0.2, 0.2])).unwrap();
    // (80, 80, 120, 120) 放大 1.4 倍
    let expected = [72.0, 72.0, 128.0, 128.0];
    for (a, b) in outcome.entry.bbox.iter().zip(expected.iter()) {
      assert!((a - b).abs() < 1e-3, "{:?}", outcome.entry.bbox);
    }
    // 修正为 (62.67, 72, 137.33, 128)，取整后裁剪
    assert_eq!(outcome.image.dimensions(), (74, 56));
  }

  #[test]
  fn show_bbox_outlines_raw_box_in_crop() {
    let config = CropConfig::default().with_show_bbox(true, 3);
    let src = source(100, 100);
    let outcome = process_image(&config, &src, &single_query([0.4, 0.4, 0.4, 0.4])).unwrap();

    // 原始框 (20, 20, 60, 60)，缩放后 (12, 12, 68, 68)
    assert_eq!(outcome.image.dimensions(), (56, 56));
    assert_eq!(outcome.image.get_pixel(8, 20), &BBOX_OUTLINE_COLOR);
    assert_eq!(outcome.image.get_pixel(10, 20), &BBOX_OUTLINE_COLOR);
    assert_eq!(outcome.image.get_pixel(11, 20), &BLACK);
    // 源图像不被修改
    assert_eq!(src.image.get_pixel(20, 20), &BLACK);
  }

  #[test]
  fn degenerate_box_is_rejected() {
    let src = source(50, 50);
    let err = process_image(
      &CropConfig::default(),
      &src,
      &single_query([0.5, 0.5, 0.0, 0.3]),
    )
    .unwrap_err();
    assert!(matches!(err, CropError::Geometry(GeometryError::Degenerate(_))));
  }

  #[test]
  fn huge_crop_ratio_is_out_of_range() {
    let src = source(200, 200);
    let config = CropConfig::default().with_crop_ratio(1e30).validate().unwrap();
    let err = process_image(&config, &src, &single_query([0.5, 0.5, 0.2, 0.2])).unwrap_err();
    assert!(matches!(err, CropError::Geometry(GeometryError::OutOfRange(_))));

    let config = config.with_fix_ratio(true);
    let err = process_image(&config, &src, &single_query([0.5, 0.5, 0.2, 0.2])).unwrap_err();
    assert!(matches!(err, CropError::Geometry(GeometryError::OutOfRange(_))));
  }

  #[test]
  fn huge_detected_box_is_out_of_range() {
    let src = source(200, 200);
    let err = process_image(
      &CropConfig::default(),
      &src,
      &single_query([0.5, 0.5, 1e20, 1e20]),
    )
    .unwrap_err();
    assert!(matches!(err, CropError::Geometry(GeometryError::OutOfRange(_))));
  }

  #[test]
  fn low_confidence_is_no_detection() {
    let config = CropConfig::default().with_min_confidence(0.99);
    let output = DetrOutput {
      logits: vec![vec![0.0, 0.0]],
      boxes: vec![[0.5, 0.5, 0.2, 0.2]],
    };
    let err = process_image(&config, &source(50, 50), &output).unwrap_err();
    assert!(matches!(
      err,
      CropError::Extract(ExtractError::NoDetection { .. })
    ));
  }

  #[test]
  fn cropped_state_cannot_advance() {
    let state = CropState::Cropped {
      image: RgbImage::new(1, 1),
    };
    assert!(matches!(
      state.advance(&CropConfig::default()),
      Err(CropError::UnexpectedStage(CropStage::Cropped))
    ));
  }
}
