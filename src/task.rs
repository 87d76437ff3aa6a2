// 该文件是 Caijian （裁剪） 项目的一部分。
// src/task.rs - 批量裁剪与可视化任务
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

use std::{fmt::Display, time::Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  extract::detections_above,
  input::{ImageBatch, SourceImage},
  model::{DetectResult, DetrOutput, Model},
  output::{Manifest, ManifestWriter, Render},
  pipeline::{CropConfig, CropStage, process_image},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 未能处理的图像及原因
#[derive(Debug, Clone, PartialEq)]
pub struct ImageIssue {
  pub filename: String,
  pub reason: String,
}

/// 一次运行的统计
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
  pub processed: usize,
  /// 没有检测结果或检测框无效，未写入记录
  pub skipped: Vec<ImageIssue>,
  /// 读取或保存失败
  pub failed: Vec<ImageIssue>,
}

impl RunSummary {
  fn skip(&mut self, filename: &str, reason: impl Display) {
    warn!("跳过图像 {}: {}", filename, reason);
    self.skipped.push(ImageIssue {
      filename: filename.to_string(),
      reason: reason.to_string(),
    });
  }

  fn fail(&mut self, filename: &str, reason: impl Display) {
    warn!("处理图像 {} 失败: {}", filename, reason);
    self.failed.push(ImageIssue {
      filename: filename.to_string(),
      reason: reason.to_string(),
    });
  }

  fn record_input_failures(&mut self, batch: &ImageBatch) {
    for failure in &batch.failures {
      self.fail(&failure.filename, &failure.reason);
    }
  }

  pub fn total(&self) -> usize {
    self.processed + self.skipped.len() + self.failed.len()
  }

  pub fn log(&self) {
    info!(
      "任务完成: 共 {} 张, 成功 {} 张, 跳过 {} 张, 失败 {} 张",
      self.total(),
      self.processed,
      self.skipped.len(),
      self.failed.len()
    );
    for issue in &self.skipped {
      warn!("已跳过 {}: {}", issue.filename, issue.reason);
    }
    for issue in &self.failed {
      warn!("已失败 {}: {}", issue.filename, issue.reason);
    }
  }
}

fn infer_batch<M, ME>(model: &M, index: usize, batch: &ImageBatch) -> anyhow::Result<Vec<DetrOutput>>
where
  M: Model<Input = ImageBatch, Output = Vec<DetrOutput>, Error = ME>,
  ME: std::error::Error + Sync + Send + 'static,
{
  let now = Instant::now();
  let outputs = model.infer(batch)?;
  info!(
    "第 {} 批 ({} 张) 推理完成，耗时: {:.2?}",
    index,
    batch.len(),
    now.elapsed()
  );
  if outputs.len() != batch.len() {
    anyhow::bail!(
      "模型输出数量 {} 与批次图像数量 {} 不一致",
      outputs.len(),
      batch.len()
    );
  }
  Ok(outputs)
}

/// 默认每 10 批写一次记录文件
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

/// 逐批推理并裁剪
///
/// 记录文件在开始时、每 `checkpoint_interval` 批之后、出现致命错误时以及结束时写入。
pub struct CropTask {
  config: CropConfig,
  manifest: ManifestWriter,
  checkpoint_interval: usize,
}

impl CropTask {
  pub fn new(config: CropConfig, manifest: ManifestWriter) -> Self {
    Self {
      config,
      manifest,
      checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
    }
  }

  /// 为 0 时只在出错和结束时写入
  pub fn with_checkpoint_interval(mut self, batches: usize) -> Self {
    self.checkpoint_interval = batches;
    self
  }

  fn is_checkpoint(&self, batch_number: usize) -> bool {
    self.checkpoint_interval != 0 && batch_number % self.checkpoint_interval == 0
  }
}

impl<I, M, O, ME, RE> Task<I, M, O> for CropTask
where
  I: Iterator<Item = ImageBatch>,
  M: Model<Input = ImageBatch, Output = Vec<DetrOutput>, Error = ME>,
  O: Render<SourceImage, RgbImage, Error = RE>,
  ME: std::error::Error + Sync + Send + 'static,
  RE: Display,
{
  type Output = RunSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始裁剪任务...");
    let mut manifest = Manifest::default();
    let mut summary = RunSummary::default();
    // 空目录也会得到一个合法的记录文件
    self.manifest.write(&manifest)?;

    for (index, batch) in input.enumerate() {
      summary.record_input_failures(&batch);
      if batch.is_empty() {
        continue;
      }

      let outputs = match infer_batch(&model, index + 1, &batch) {
        Ok(outputs) => outputs,
        Err(e) => {
          // 保留已处理图像的记录
          self.manifest.write(&manifest)?;
          return Err(e);
        }
      };
      for (source, detr) in batch.images.iter().zip(outputs.iter()) {
        if manifest.contains(&source.filename) {
          summary.skip(&source.filename, "文件名重复");
          continue;
        }

        let outcome = match process_image(&self.config, source, detr) {
          Ok(outcome) => outcome,
          Err(e) => {
            summary.skip(&source.filename, e);
            continue;
          }
        };

        if let Err(e) = output.render_result(source, &outcome.image) {
          summary.fail(&source.filename, e);
          continue;
        }
        debug!(
          "{}: {} (置信度 {:.4}, {}x{})",
          source.filename,
          CropStage::Saved,
          outcome.score,
          outcome.image.width(),
          outcome.image.height()
        );
        manifest.push(outcome.entry)?;
        summary.processed += 1;
      }

      if self.is_checkpoint(index + 1) {
        debug!("第 {} 批后写入记录文件", index + 1);
        self.manifest.write(&manifest)?;
      }
    }

    self.manifest.write(&manifest)?;
    info!(
      "记录文件 {} 共 {} 条",
      self.manifest.path().display(),
      manifest.len()
    );
    summary.log();
    Ok(summary)
  }
}

/// 绘制前 `limit` 张图像中置信度高于 `threshold` 的全部检测结果
#[derive(Debug, Clone)]
pub struct VisualizeTask {
  threshold: f32,
  limit: Option<usize>,
}

impl Default for VisualizeTask {
  fn default() -> Self {
    Self {
      threshold: 0.9,
      limit: Some(5),
    }
  }
}

impl VisualizeTask {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }
}

impl<I, M, O, ME, RE> Task<I, M, O> for VisualizeTask
where
  I: Iterator<Item = ImageBatch>,
  M: Model<Input = ImageBatch, Output = Vec<DetrOutput>, Error = ME>,
  O: Render<SourceImage, DetectResult, Error = RE>,
  ME: std::error::Error + Sync + Send + 'static,
  RE: Display,
{
  type Output = RunSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始可视化任务, 阈值 {}", self.threshold);
    let mut summary = RunSummary::default();

    'batches: for (index, batch) in input.enumerate() {
      summary.record_input_failures(&batch);
      if batch.is_empty() {
        continue;
      }

      let outputs = infer_batch(&model, index + 1, &batch)?;
      for (source, detr) in batch.images.iter().zip(outputs.iter()) {
        if self.limit.is_some_and(|n| summary.processed >= n) {
          info!("达到可视化数量 {}, 退出任务循环", summary.processed);
          break 'batches;
        }

        let (width, height) = source.image.dimensions();
        let items = match detections_above(detr, width, height, self.threshold) {
          Ok(items) => items,
          Err(e) => {
            summary.skip(&source.filename, e);
            continue;
          }
        };

        match output.render_result(source, &DetectResult::from(items)) {
          Ok(()) => summary.processed += 1,
          Err(e) => summary.fail(&source.filename, e),
        }
      }
    }

    summary.log();
    Ok(summary)
  }
}
