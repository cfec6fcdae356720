//! dicom2fhir 命令行程序

mod settings;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dicom2fhir_convert::convert_directory;
use settings::AppConfig;
use std::path::PathBuf;
use tracing::{info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "dicom2fhir")]
#[command(about = "把一个目录中的DICOM文件转换为FHIR ImagingStudy")]
struct Args {
    /// DICOM文件所在目录 (递归遍历)
    input_dir: PathBuf,

    /// 输出文件路径，缺省时写到标准输出
    #[arg(short, long)]
    output: Option<String>,

    /// 格式化输出JSON
    #[arg(short, long)]
    pretty: bool,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    /// 命令行参数覆盖配置
    fn apply(&self, config: &mut AppConfig) {
        if let Some(output) = &self.output {
            config.output.path = Some(output.clone());
        }
        if self.pretty {
            config.output.pretty = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    // 初始化日志，写到标准错误，标准输出只保留JSON
    tracing_subscriber::fmt()
        .with_env_filter(&config.logging.level)
        .with_writer(std::io::stderr)
        .init();

    info!("开始转换: {}", args.input_dir.display());

    let result = convert_directory(&args.input_dir)
        .with_context(|| format!("转换目录失败: {}", args.input_dir.display()))?;

    let Some(study) = result.study else {
        warn!("目录中没有可解码的DICOM文件: {}", args.input_dir.display());
        bail!("no DICOM study found in {}", args.input_dir.display());
    };

    info!(
        "生成 ImagingStudy: 序列 {}, 实例 {}",
        study.number_of_series, study.number_of_instances
    );

    let json = if config.output.pretty {
        serde_json::to_string_pretty(&study)?
    } else {
        serde_json::to_string(&study)?
    };

    match config.output.path.as_deref() {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("写入输出文件失败: {}", path))?;
            info!("输出已写入: {}", path);
        }
        None => println!("{}", json),
    }

    Ok(())
}
