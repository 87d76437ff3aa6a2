// 该文件是 Caijian （裁剪） 项目的一部分。
// src/input/read_image_dir.rs - 按批次读取目录中的图像文件
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{info, warn};

use crate::input::{ImageBatch, InputFailure, SourceImage};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageDirInputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("批次大小必须大于 0")]
  ZeroBatchSize,
}

/// 目录图像输入，按文件名排序，每次迭代产出一个批次
pub struct ImageDirInput {
  files: std::vec::IntoIter<PathBuf>,
  batch_size: usize,
}

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

fn load_image(path: &Path) -> Result<image::RgbImage, ImageDirInputError> {
  let image = ImageReader::open(path)?.decode()?;
  Ok(image.into_rgb8())
}

impl ImageDirInput {
  pub fn open(directory: &Path, batch_size: usize) -> Result<Self, ImageDirInputError> {
    if batch_size == 0 {
      return Err(ImageDirInputError::ZeroBatchSize);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();
    info!("输入目录 {} 中共 {} 张图像", directory.display(), files.len());

    Ok(Self {
      files: files.into_iter(),
      batch_size,
    })
  }

  /// 剩余未读取的文件数
  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for ImageDirInput {
  type Item = ImageBatch;

  fn next(&mut self) -> Option<Self::Item> {
    let paths: Vec<PathBuf> = self.files.by_ref().take(self.batch_size).collect();
    if paths.is_empty() {
      return None;
    }

    let mut batch = ImageBatch::default();
    for path in paths {
      let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
      match load_image(&path) {
        Ok(image) => batch.images.push(SourceImage { filename, image }),
        Err(e) => {
          warn!("无法读取图像 {}: {}", path.display(), e);
          batch.failures.push(InputFailure {
            filename,
            reason: e.to_string(),
          });
        }
      }
    }
    Some(batch)
  }
}
