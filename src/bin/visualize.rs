// 该文件是 Caijian （裁剪） 项目的一部分。
// src/bin/visualize.rs - 检测结果可视化
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

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use caijian::{
  FromUrl,
  input::ImageDirInput,
  model::{LabelMap, ModelWrapper},
  output::{
    OverlayDirectoryOutput,
    draw::{Draw, SYSTEM_FONT_CANDIDATES, find_font_file},
  },
  task::{Task, VisualizeTask},
};

/// 可视化参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 图像所在目录
  #[arg(long, value_name = "DIR")]
  pub input_dir: PathBuf,
  /// 模型来源，例如 replay:///path/to/predictions.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// COCO 标注文件，用于读取类别名称
  #[arg(long, value_name = "FILE")]
  pub annotations: Option<PathBuf>,
  /// 可视化结果输出目录
  #[arg(long, value_name = "DIR", default_value = "visualization")]
  pub output_dir: PathBuf,
  /// 可视化的图像数量
  #[arg(long, default_value_t = 5)]
  pub visualize_number: usize,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.9)]
  pub threshold: f32,
  /// 标签字体 (TrueType)，绘制类别与置信度文字需要字体。
  /// 不指定时尝试常见系统字体 (如 DejaVuSans、Arial)，均不存在则只绘制检测框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 检测框线宽
  #[arg(long, default_value_t = 3)]
  pub width_of_bbox: u32,
}

fn load_font(path: &Path) -> Result<FontVec> {
  let data = std::fs::read(path).with_context(|| format!("无法读取字体 {}", path.display()))?;
  FontVec::try_from_vec(data).with_context(|| format!("无法解析字体 {}", path.display()))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入目录: {}", args.input_dir.display());
  info!("模型来源: {}", args.model);
  info!("输出目录: {}", args.output_dir.display());

  let labels = match args.annotations.as_deref() {
    Some(path) => LabelMap::from_coco_file(path)?,
    None => {
      warn!("未指定标注文件，使用类别编号作为标签");
      LabelMap::default()
    }
  };
  info!("共 {} 个类别", labels.len());

  let font_path = args.font.clone().or_else(|| {
    let found = find_font_file(SYSTEM_FONT_CANDIDATES);
    if let Some(path) = found.as_ref() {
      info!("未指定字体，使用系统字体 {}", path.display());
    }
    found
  });
  let font = font_path.as_deref().map(load_font).transpose()?;
  if font.is_none() {
    warn!("未找到可用字体，只绘制检测框，请通过 --font 指定 TrueType 字体");
  }

  let input = ImageDirInput::open(&args.input_dir, 1)?;
  let output = OverlayDirectoryOutput::create(
    &args.output_dir,
    Draw::new(font, args.width_of_bbox),
    labels,
  )?;
  let model = ModelWrapper::from_url(&args.model)?;

  VisualizeTask::default()
    .with_threshold(args.threshold)
    .with_limit(Some(args.visualize_number))
    .run_task(input, model, output)?;

  Ok(())
}
