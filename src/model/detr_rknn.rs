// 该文件是 Caijian （裁剪） 项目的一部分。
// src/model/detr_rknn.rs - RKNN 上的 DETR 推理
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

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::ImageBatch,
  model::{DetrOutput, Model},
  url_file_path,
};

const DETR_NUM_INPUTS: u32 = 1;
const DETR_NUM_OUTPUTS: u32 = 2;
const DETR_DEFAULT_QUERIES: usize = 100;
// 单一类别 + “无目标”
const DETR_DEFAULT_CLASSES: usize = 2;
const DETR_DEFAULT_INPUT_SIZE: u32 = 800;

#[derive(Error, Debug)]
pub enum DetrRknnError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出大小不匹配: {0} / {1}")]
  OutputMismatch(usize, usize),
}

impl From<std::io::Error> for DetrRknnError {
  fn from(err: std::io::Error) -> Self {
    DetrRknnError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for DetrRknnError {
  fn from(err: rknpu::Error) -> Self {
    DetrRknnError::RknnError(err)
  }
}

impl DetrRknnError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    DetrRknnError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct DetrRknn {
  context: Context,
  input_width: u32,
  input_height: u32,
  num_queries: usize,
  num_classes: usize,
}

/// 由 `detr-rknn:///path/model.rknn?width=800&height=800&queries=100&classes=2` 构建
pub struct DetrRknnBuilder {
  model_path: PathBuf,
  input_width: u32,
  input_height: u32,
  num_queries: usize,
  num_classes: usize,
}

impl FromUrlWithScheme for DetrRknnBuilder {
  const SCHEME: &'static str = "detr-rknn";
}

impl FromUrl for DetrRknnBuilder {
  type Error = DetrRknnError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetrRknnError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = DetrRknnBuilder {
      model_path: url_file_path(url)
        .map_err(|e| DetrRknnError::ModelPathError(format!("模型路径解码失败: {}", e)))?,
      input_width: DETR_DEFAULT_INPUT_SIZE,
      input_height: DETR_DEFAULT_INPUT_SIZE,
      num_queries: DETR_DEFAULT_QUERIES,
      num_classes: DETR_DEFAULT_CLASSES,
    };

    for (k, v) in url.query_pairs() {
      let invalid = || DetrRknnError::ModelPathError(format!("无效的参数 {}={}", k, v));
      match k.as_ref() {
        "width" => builder.input_width = v.parse().map_err(|_| invalid())?,
        "height" => builder.input_height = v.parse().map_err(|_| invalid())?,
        "queries" => builder.num_queries = v.parse().map_err(|_| invalid())?,
        "classes" => builder.num_classes = v.parse().map_err(|_| invalid())?,
        _ => debug!("忽略未知参数: {}", k),
      }
    }

    Ok(builder)
  }
}

impl DetrRknnBuilder {
  pub fn build(self) -> Result<DetrRknn, DetrRknnError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| DetrRknnError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| DetrRknnError::invalid("无法获取输出数量", e))?;

    if num_inputs != DETR_NUM_INPUTS || num_outputs != DETR_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        DETR_NUM_INPUTS, DETR_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(DetrRknnError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!(
      "模型加载完成: 输入 {}x{}, {} 个查询, {} 个类别",
      self.input_width, self.input_height, self.num_queries, self.num_classes
    );

    Ok(DetrRknn {
      context,
      input_width: self.input_width,
      input_height: self.input_height,
      num_queries: self.num_queries,
      num_classes: self.num_classes,
    })
  }
}

/// 根据张量大小区分分类输出与回归输出，返回 (logits, boxes)
fn match_logits_boxes<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  logits_expected: usize,
  boxes_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == logits_expected && tensor2.len() == boxes_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == boxes_expected && tensor2.len() == logits_expected {
    debug!("输出顺序交换");
    Some((tensor2, tensor1))
  } else {
    None
  }
}

impl DetrRknn {
  fn infer_one(&self, image: &image::RgbImage) -> Result<DetrOutput, DetrRknnError> {
    // 拉伸缩放，归一化框相对原图与相对输入一致
    let resized = imageops::resize(
      image,
      self.input_width,
      self.input_height,
      FilterType::Triangle,
    );

    self.context.set_input(
      0,
      resized.as_raw(),
      TensorFormat::NHWC,
      TensorType::UInt8,
    )?;
    self.context.run()?;
    let output = self.context.get_outputs()?;

    let tensor1 = output.get_f32(0)?;
    let tensor2 = output.get_f32(1)?;
    let logits_expected = self.num_queries * self.num_classes;
    let boxes_expected = self.num_queries * 4;
    let (logits, boxes) = match_logits_boxes(tensor1, tensor2, logits_expected, boxes_expected)
      .ok_or_else(|| {
        error!(
          "输出大小不匹配 - 张量1: {}, 张量2: {}, 期望分类: {}, 期望回归: {}",
          tensor1.len(),
          tensor2.len(),
          logits_expected,
          boxes_expected
        );
        DetrRknnError::OutputMismatch(tensor1.len(), tensor2.len())
      })?;

    Ok(DetrOutput {
      logits: logits
        .chunks_exact(self.num_classes)
        .map(|row| row.to_vec())
        .collect(),
      boxes: boxes
        .chunks_exact(4)
        .map(|b| [b[0], b[1], b[2], b[3]])
        .collect(),
    })
  }
}

impl Model for DetrRknn {
  type Input = ImageBatch;
  type Output = Vec<DetrOutput>;
  type Error = DetrRknnError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    // NPU 上下文一次处理一张图像
    input
      .images
      .iter()
      .map(|source| {
        debug!("推理: {}", source.filename);
        self.infer_one(&source.image)
      })
      .collect()
  }
}
