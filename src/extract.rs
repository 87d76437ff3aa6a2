// 该文件是 Caijian （裁剪） 项目的一部分。
// src/extract.rs - 从 DETR 输出中提取边界框
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

use thiserror::Error;
use tracing::debug;

use crate::{
  geometry::NormalizedBox,
  model::{DetectItem, DetrOutput},
};

#[derive(Error, Debug, PartialEq)]
pub enum ExtractError {
  #[error("没有可用的检测结果 (最高置信度 {best:?}, 阈值 {threshold})")]
  NoDetection { best: Option<f32>, threshold: f32 },
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
}

/// 单个查询的最佳类别与归一化框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: NormalizedBox,
}

impl Detection {
  pub fn to_item(&self, width: u32, height: u32) -> DetectItem {
    DetectItem {
      class_id: self.class_id,
      score: self.score,
      bbox: self.bbox.to_pixels(width, height),
    }
  }
}

/// softmax 后排除最后的 “无目标” 类别，返回 (类别, 概率)
fn best_class(logits: &[f32]) -> Result<(u32, f32), ExtractError> {
  if logits.len() < 2 {
    return Err(ExtractError::MalformedOutput(format!(
      "类别数为 {}, 至少需要 2 (含无目标类别)",
      logits.len()
    )));
  }

  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exp: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
  let sum: f32 = exp.iter().sum();

  let mut best = (0u32, f32::NEG_INFINITY);
  for (class_id, value) in exp[..exp.len() - 1].iter().enumerate() {
    let prob = value / sum;
    if prob > best.1 {
      best = (class_id as u32, prob);
    }
  }
  Ok(best)
}

/// 每个查询的最佳类别检测结果
pub fn detections(output: &DetrOutput) -> Result<Vec<Detection>, ExtractError> {
  if output.logits.len() != output.boxes.len() {
    return Err(ExtractError::MalformedOutput(format!(
      "分类输出 {} 个查询, 回归输出 {} 个查询",
      output.logits.len(),
      output.boxes.len()
    )));
  }

  output
    .logits
    .iter()
    .zip(output.boxes.iter())
    .map(|(logits, bbox)| {
      let (class_id, score) = best_class(logits)?;
      Ok(Detection {
        class_id,
        score,
        bbox: NormalizedBox::from(*bbox),
      })
    })
    .collect()
}

/// 置信度最高的检测结果；没有查询时返回 None
pub fn best_detection(output: &DetrOutput) -> Result<Option<Detection>, ExtractError> {
  let mut best: Option<Detection> = None;
  for detection in detections(output)? {
    if best.is_none_or(|b| detection.score > b.score) {
      best = Some(detection);
    }
  }
  Ok(best)
}

/// 取置信度最高的检测框并转换为 `width` x `height` 图像上的像素坐标
///
/// 最高置信度低于 `min_confidence`（或为 NaN）时返回 [`ExtractError::NoDetection`]。
pub fn bbox_from_output(
  output: &DetrOutput,
  width: u32,
  height: u32,
  min_confidence: f32,
) -> Result<DetectItem, ExtractError> {
  let best = best_detection(output)?;
  match best {
    Some(detection) if detection.score >= min_confidence => {
      let item = detection.to_item(width, height);
      debug!(
        "最佳检测: 类别 {}, 置信度 {:.4}, 框 {:?}",
        item.class_id,
        item.score,
        item.bbox.to_array()
      );
      Ok(item)
    }
    _ => Err(ExtractError::NoDetection {
      best: best.map(|d| d.score),
      threshold: min_confidence,
    }),
  }
}

/// 置信度高于 `threshold` 的全部检测结果，像素坐标
pub fn detections_above(
  output: &DetrOutput,
  width: u32,
  height: u32,
  threshold: f32,
) -> Result<Vec<DetectItem>, ExtractError> {
  Ok(
    detections(output)?
      .into_iter()
      .filter(|d| d.score > threshold)
      .map(|d| d.to_item(width, height))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn output(logits: Vec<Vec<f32>>, boxes: Vec<[f32; 4]>) -> DetrOutput {
    DetrOutput { logits, boxes }
  }

  #[test]
  fn no_object_class_is_ignored() {
    // 第一个查询 “无目标” 概率极高，第二个查询目标概率较高
    let out = output(
      vec![vec![0.0, 10.0], vec![2.0, 0.0]],
      vec![[0.1, 0.1, 0.1, 0.1], [0.5, 0.5, 0.2, 0.4]],
    );
    let best = best_detection(&out).unwrap().unwrap();
    assert_eq!(best.class_id, 0);
    assert_eq!(best.bbox, NormalizedBox::from([0.5, 0.5, 0.2, 0.4]));
    assert!(best.score > 0.8);
  }

  #[test]
  fn argmax_over_classes_and_queries() {
    let out = output(
      vec![vec![1.0, 3.0, 0.0, 0.0], vec![0.0, 0.0, 5.0, 0.0]],
      vec![[0.2, 0.2, 0.1, 0.1], [0.7, 0.7, 0.2, 0.2]],
    );
    let best = best_detection(&out).unwrap().unwrap();
    assert_eq!(best.class_id, 2);
  }

  #[test]
  fn converts_to_pixels() {
    let out = output(vec![vec![5.0, 0.0]], vec![[0.5, 0.5, 0.2, 0.4]]);
    let item = bbox_from_output(&out, 200, 100, 0.0).unwrap();
    let bbox = item.bbox.to_array();
    let expected = [80.0, 30.0, 120.0, 70.0];
    for (a, b) in bbox.iter().zip(expected.iter()) {
      assert!((a - b).abs() < 1e-3);
    }
  }

  #[test]
  fn empty_output_is_no_detection() {
    let err = bbox_from_output(&DetrOutput::default(), 10, 10, 0.0).unwrap_err();
    assert_eq!(
      err,
      ExtractError::NoDetection {
        best: None,
        threshold: 0.0
      }
    );
  }

  #[test]
  fn below_floor_is_no_detection() {
    let out = output(vec![vec![0.0, 0.0]], vec![[0.5, 0.5, 0.2, 0.4]]);
    // softmax([0, 0]) = 0.5
    assert!(matches!(
      bbox_from_output(&out, 10, 10, 0.9),
      Err(ExtractError::NoDetection { .. })
    ));
    assert!(bbox_from_output(&out, 10, 10, 0.4).is_ok());
  }

  #[test]
  fn mismatched_queries_are_malformed() {
    let out = output(vec![vec![0.0, 0.0]], vec![]);
    assert!(matches!(
      best_detection(&out),
      Err(ExtractError::MalformedOutput(_))
    ));
    let out = output(vec![vec![0.0]], vec![[0.0; 4]]);
    assert!(matches!(
      best_detection(&out),
      Err(ExtractError::MalformedOutput(_))
    ));
  }

  #[test]
  fn threshold_filters_detections() {
    let out = output(
      vec![vec![5.0, 0.0], vec![0.0, 5.0], vec![4.0, 0.0]],
      vec![[0.5, 0.5, 0.2, 0.2], [0.1, 0.1, 0.1, 0.1], [0.3, 0.3, 0.2, 0.2]],
    );
    let items = detections_above(&out, 100, 100, 0.9).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.score > 0.9));
  }
}
