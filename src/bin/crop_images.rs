// 该文件是 Caijian （裁剪） 项目的一部分。
// src/bin/crop_images.rs - 根据检测框批量裁剪图像
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

use anyhow::Result;
use clap::Parser;
use image::Rgb;
use tracing::info;
use url::Url;

use caijian::{
  FromUrl,
  geometry::ScaleMode,
  input::ImageDirInput,
  model::ModelWrapper,
  output::{CropDirectoryOutput, ManifestWriter},
  pipeline::CropConfig,
  task::{CropTask, DEFAULT_CHECKPOINT_INTERVAL, Task},
};

/// 批量裁剪参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 原始图像所在目录
  #[arg(long, value_name = "DIR")]
  pub input_dir: PathBuf,
  /// 模型来源，例如 replay:///path/to/predictions.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 裁剪结果输出目录
  #[arg(long, value_name = "DIR", default_value = "cropped_image")]
  pub output_dir: PathBuf,
  /// 每批图像数量
  #[arg(long, default_value_t = 1)]
  pub batch_size: usize,
  /// 检测框缩放比例
  #[arg(long, default_value_t = 1.4)]
  pub crop_ratio: f32,
  /// 宽、高按相同长度扩展
  #[arg(long)]
  pub equal_extend: bool,
  /// 在裁剪结果中绘制原始检测框
  #[arg(long)]
  pub show_bbox: bool,
  /// 检测框线宽
  #[arg(long, default_value_t = 3)]
  pub width_of_bbox: u32,
  /// 将裁剪区域扩展为 4:3
  #[arg(long)]
  pub fix_ratio: bool,
  /// 竖向目标旋转后再修正为 4:3
  #[arg(long)]
  pub rotate_image: bool,
  /// 背景颜色 R 分量
  #[arg(long = "background-color-r", default_value_t = 234)]
  pub background_color_r: u8,
  /// 背景颜色 G 分量
  #[arg(long = "background-color-g", default_value_t = 242)]
  pub background_color_g: u8,
  /// 背景颜色 B 分量
  #[arg(long = "background-color-b", default_value_t = 245)]
  pub background_color_b: u8,
  /// 最低置信度，低于该值的图像被跳过
  #[arg(long, default_value_t = 0.0)]
  pub min_confidence: f32,
  /// 每处理多少批写一次记录文件，0 表示只在结束或出错时写入
  #[arg(long, default_value_t = DEFAULT_CHECKPOINT_INTERVAL)]
  pub checkpoint_interval: usize,
}

impl Args {
  fn crop_config(&self) -> CropConfig {
    let scale_mode = if self.equal_extend {
      ScaleMode::EqualExtend
    } else {
      ScaleMode::Proportional
    };
    CropConfig::default()
      .with_crop_ratio(self.crop_ratio)
      .with_scale_mode(scale_mode)
      .with_fix_ratio(self.fix_ratio)
      .with_rotate_image(self.rotate_image)
      .with_background_color(Rgb([
        self.background_color_r,
        self.background_color_g,
        self.background_color_b,
      ]))
      .with_show_bbox(self.show_bbox, self.width_of_bbox)
      .with_min_confidence(self.min_confidence)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.crop_config().validate()?;

  info!("输入目录: {}", args.input_dir.display());
  info!("模型来源: {}", args.model);
  info!("输出目录: {}", args.output_dir.display());
  info!("裁剪参数: {:?}", config);

  let input = ImageDirInput::open(&args.input_dir, args.batch_size)?;
  let output = CropDirectoryOutput::create(&args.output_dir)?;
  let manifest = ManifestWriter::in_directory(output.directory());

  info!("正在加载模型...");
  let model = ModelWrapper::from_url(&args.model)?;
  info!("模型加载完成");

  CropTask::new(config, manifest)
    .with_checkpoint_interval(args.checkpoint_interval)
    .run_task(input, model, output)?;

  Ok(())
}
