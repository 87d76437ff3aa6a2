// 该文件是 Caijian （裁剪） 项目的一部分。
// src/output/overlay.rs - 检测结果叠加图输出
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

use tracing::info;

use crate::{
  input::SourceImage,
  model::{DetectResult, LabelMap},
  output::{
    Render,
    draw::Draw,
    save_image_file::{SaveImageFileError, save_into},
  },
};

/// 在源图像副本上绘制检测框与标签，保存到 `directory`
pub struct OverlayDirectoryOutput {
  directory: PathBuf,
  draw: Draw,
  labels: LabelMap,
}

impl OverlayDirectoryOutput {
  pub fn create(directory: &Path, draw: Draw, labels: LabelMap) -> Result<Self, SaveImageFileError> {
    std::fs::create_dir_all(directory)?;
    info!("可视化输出目录: {}", directory.display());
    Ok(Self {
      directory: directory.to_path_buf(),
      draw,
      labels,
    })
  }
}

impl Render<SourceImage, DetectResult> for OverlayDirectoryOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &SourceImage, result: &DetectResult) -> Result<(), Self::Error> {
    let canvas = self.draw.draw_detections(&frame.image, result, &self.labels);
    let path = save_into(&self.directory, &frame.filename, &canvas)?;
    info!("{}: {} 个检测结果 -> {}", frame.filename, result.len(), path.display());
    Ok(())
  }
}
