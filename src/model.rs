// 该文件是 Caijian （裁剪） 项目的一部分。
// src/model.rs - 模型
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

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, geometry::BoundingBox, input::ImageBatch};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// DETR 单张图像的原始输出
///
/// `logits` 每个查询一行，最后一列为 “无目标” 类别；
/// `boxes` 为对应查询的归一化框 (cx, cy, w, h)。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetrOutput {
  pub logits: Vec<Vec<f32>>,
  #[serde(rename = "pred_boxes")]
  pub boxes: Vec<[f32; 4]>,
}

impl DetrOutput {
  pub fn num_queries(&self) -> usize {
    self.logits.len()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoundingBox, // 像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LabelMapError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标注文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct CocoCategory {
  id: u32,
  name: String,
}

#[derive(Deserialize)]
struct CocoCategories {
  categories: Vec<CocoCategory>,
}

/// 类别编号到名称的映射
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  names: BTreeMap<u32, String>,
}

impl LabelMap {
  /// 从 COCO 标注文件的 `categories` 字段读取
  pub fn from_coco_file(path: &Path) -> Result<Self, LabelMapError> {
    let data = std::fs::read(path)?;
    Self::from_coco_slice(&data)
  }

  pub fn from_coco_slice(data: &[u8]) -> Result<Self, LabelMapError> {
    let coco: CocoCategories = serde_json::from_slice(data)?;
    Ok(coco.categories.into_iter().map(|c| (c.id, c.name)).collect())
  }

  pub fn label(&self, class_id: u32) -> String {
    self
      .names
      .get(&class_id)
      .cloned()
      .unwrap_or_else(|| format!("class {}", class_id))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl FromIterator<(u32, String)> for LabelMap {
  fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().collect(),
    }
  }
}

#[cfg(feature = "replay_model")]
mod replay;
#[cfg(feature = "replay_model")]
pub use self::replay::{ReplayModel, ReplayModelError};

#[cfg(feature = "model_detr_rknn")]
mod detr_rknn;
#[cfg(feature = "model_detr_rknn")]
pub use self::detr_rknn::{DetrRknn, DetrRknnBuilder, DetrRknnError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "replay_model")]
  #[error("回放模型错误: {0}")]
  ReplayModelError(#[from] ReplayModelError),
  #[cfg(feature = "model_detr_rknn")]
  #[error("DETR RKNN 模型错误: {0}")]
  DetrRknnError(#[from] DetrRknnError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum ModelWrapper {
  #[cfg(feature = "replay_model")]
  Replay(ReplayModel),
  #[cfg(feature = "model_detr_rknn")]
  DetrRknn(DetrRknn),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "replay_model")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ReplayModel::SCHEME {
        return Ok(ModelWrapper::Replay(ReplayModel::from_url(url)?));
      }
    }
    #[cfg(feature = "model_detr_rknn")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DetrRknnBuilder::SCHEME {
        let model = DetrRknnBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::DetrRknn(model));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Model for ModelWrapper {
  type Input = ImageBatch;
  type Output = Vec<DetrOutput>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "replay_model")]
      ModelWrapper::Replay(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "model_detr_rknn")]
      ModelWrapper::DetrRknn(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
