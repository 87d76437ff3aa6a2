// 该文件是 Caijian （裁剪） 项目的一部分。
// src/model/replay.rs - 回放预先导出的 DETR 推理结果
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

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::ImageBatch,
  model::{DetrOutput, Model},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: String, found: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("预测文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("预测文件路径不是有效的 UTF-8: {0}")]
  PathDecodeError(#[from] std::string::FromUtf8Error),
}

/// 以文件名为键，回放训练环境导出的 DETR 输出
///
/// 预测文件为 JSON 对象：
/// `{"a.jpg": {"logits": [[...], ...], "pred_boxes": [[cx, cy, w, h], ...]}, ...}`
pub struct ReplayModel {
  predictions: HashMap<String, DetrOutput>,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        found: url.scheme().to_string(),
      });
    }

    let path = url_file_path(url)?;
    info!("加载预测文件: {}", path.display());
    let data = std::fs::read(&path)?;
    let predictions: HashMap<String, DetrOutput> = serde_json::from_slice(&data)?;
    info!("共加载 {} 张图像的预测结果", predictions.len());

    Ok(Self::from_predictions(predictions))
  }
}

impl ReplayModel {
  pub fn from_predictions(predictions: HashMap<String, DetrOutput>) -> Self {
    Self { predictions }
  }
}

impl Model for ReplayModel {
  type Input = ImageBatch;
  type Output = Vec<DetrOutput>;
  type Error = ReplayModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let outputs = input
      .images
      .iter()
      .map(|source| match self.predictions.get(&source.filename) {
        Some(output) => {
          debug!("{}: 回放 {} 个查询", source.filename, output.num_queries());
          output.clone()
        }
        None => {
          warn!("{}: 预测文件中没有该图像", source.filename);
          DetrOutput::default()
        }
      })
      .collect();
    Ok(outputs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::SourceImage;
  use image::RgbImage;
  use std::io::Write;

  fn batch(names: &[&str]) -> ImageBatch {
    ImageBatch {
      images: names
        .iter()
        .map(|name| SourceImage {
          filename: name.to_string(),
          image: RgbImage::new(4, 4),
        })
        .collect(),
      failures: Vec::new(),
    }
  }

  #[test]
  fn replays_by_filename_and_keeps_batch_order() {
    let first = DetrOutput {
      logits: vec![vec![3.0, 0.0]],
      boxes: vec![[0.5, 0.5, 0.5, 0.5]],
    };
    let model = ReplayModel::from_predictions(HashMap::from([("a.png".to_string(), first.clone())]));

    let outputs = model.infer(&batch(&["missing.png", "a.png"])).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0], DetrOutput::default());
    assert_eq!(outputs[1], first);
  }

  #[test]
  fn loads_from_url() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{"b.jpg": {{"logits": [[0.0, 1.0, 2.0]], "pred_boxes": [[0.1, 0.2, 0.3, 0.4]]}}}}"#
    )
    .unwrap();
    let url = Url::parse(&format!("replay://{}", file.path().display())).unwrap();

    let model = ReplayModel::from_url(&url).unwrap();
    let outputs = model.infer(&batch(&["b.jpg"])).unwrap();
    assert_eq!(outputs[0].logits[0].len(), 3);
  }

  #[test]
  fn loads_from_path_with_spaces() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("my run.json");
    std::fs::write(
      &path,
      r#"{"c.jpg": {"logits": [[4.0, 0.0]], "pred_boxes": [[0.5, 0.5, 0.2, 0.2]]}}"#,
    )
    .unwrap();
    let url = Url::parse(&format!("replay://{}", path.display())).unwrap();
    assert!(url.path().contains("%20"));

    let model = ReplayModel::from_url(&url).unwrap();
    let outputs = model.infer(&batch(&["c.jpg"])).unwrap();
    assert_eq!(outputs[0].num_queries(), 1);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("detr-rknn:///model.rknn").unwrap();
    assert!(matches!(
      ReplayModel::from_url(&url),
      Err(ReplayModelError::SchemeMismatch { .. })
    ));
  }
}
