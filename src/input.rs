// 该文件是 Caijian （裁剪） 项目的一部分。
// src/input.rs - 图像输入
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

use image::RgbImage;

mod read_image_dir;
pub use self::read_image_dir::{ImageDirInput, ImageDirInputError};

/// 一张已解码的输入图像
#[derive(Debug, Clone)]
pub struct SourceImage {
  pub filename: String,
  pub image: RgbImage,
}

/// 无法读取的输入文件
#[derive(Debug, Clone)]
pub struct InputFailure {
  pub filename: String,
  pub reason: String,
}

/// 一个批次的输入
#[derive(Debug, Clone, Default)]
pub struct ImageBatch {
  pub images: Vec<SourceImage>,
  pub failures: Vec<InputFailure>,
}

impl ImageBatch {
  pub fn len(&self) -> usize {
    self.images.len()
  }

  pub fn is_empty(&self) -> bool {
    self.images.is_empty()
  }
}
