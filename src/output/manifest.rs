// 该文件是 Caijian （裁剪） 项目的一部分。
// src/output/manifest.rs - 原图尺寸与检测框记录
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

use std::{
  collections::HashSet,
  fs,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_FILE_NAME: &str = "size_of_original_image_and_bbox.json";

#[derive(Error, Debug)]
pub enum ManifestError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("重复的记录: {0}")]
  Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
  pub filename: String,
  pub original_size: (u32, u32),
  pub bbox: [f32; 4],
}

/// 只追加的记录列表，顺序即处理顺序
#[derive(Debug, Clone, Default)]
pub struct Manifest {
  entries: Vec<ManifestEntry>,
  filenames: HashSet<String>,
}

impl Manifest {
  pub fn push(&mut self, entry: ManifestEntry) -> Result<(), ManifestError> {
    if !self.filenames.insert(entry.filename.clone()) {
      return Err(ManifestError::Duplicate(entry.filename));
    }
    self.entries.push(entry);
    Ok(())
  }

  pub fn contains(&self, filename: &str) -> bool {
    self.filenames.contains(filename)
  }

  pub fn entries(&self) -> &[ManifestEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// 写入 `<dir>/size_of_original_image_and_bbox.json`
///
/// 先写临时文件再重命名，文件内容始终是完整的 JSON 数组。
#[derive(Debug, Clone)]
pub struct ManifestWriter {
  path: PathBuf,
}

impl ManifestWriter {
  pub fn in_directory(directory: &Path) -> Self {
    Self {
      path: directory.join(MANIFEST_FILE_NAME),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn write(&self, manifest: &Manifest) -> Result<(), ManifestError> {
    let tmp = self.path.with_extension("json.tmp");
    {
      let mut writer = BufWriter::new(fs::File::create(&tmp)?);
      serde_json::to_writer(&mut writer, manifest.entries())?;
      writer.flush()?;
    }
    fs::rename(&tmp, &self.path)?;
    debug!("写入 {} 条记录到 {}", manifest.len(), self.path.display());
    Ok(())
  }

  pub fn read(path: &Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
  }
}
