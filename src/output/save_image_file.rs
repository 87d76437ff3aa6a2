// 该文件是 Caijian （裁剪） 项目的一部分。
// src/output/save_image_file.rs - 保存裁剪后的图像文件
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{input::SourceImage, output::Render};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 以源文件名保存到 `directory` 下，格式由扩展名决定
pub(crate) fn save_into(
  directory: &Path,
  filename: &str,
  image: &RgbImage,
) -> Result<PathBuf, SaveImageFileError> {
  let path = directory.join(filename);
  image.save(&path)?;
  debug!("保存图像到文件: {}", path.display());
  Ok(path)
}

/// 裁剪结果输出目录，文件名与源图像相同
#[derive(Debug, Clone)]
pub struct CropDirectoryOutput {
  directory: PathBuf,
}

impl CropDirectoryOutput {
  /// 创建输出目录（已存在时直接使用）
  pub fn create(directory: &Path) -> Result<Self, SaveImageFileError> {
    std::fs::create_dir_all(directory)?;
    info!("输出目录: {}", directory.display());
    Ok(Self {
      directory: directory.to_path_buf(),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }
}

impl Render<SourceImage, RgbImage> for CropDirectoryOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &SourceImage, result: &RgbImage) -> Result<(), Self::Error> {
    save_into(&self.directory, &frame.filename, result).map(|_| ())
  }
}
