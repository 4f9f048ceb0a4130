use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use omr_config::{AppConfig, ConfigError};
use omr_core::resolver::StaffGapPolicy;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod loader;

/// 把识别出的乐谱符号装配进乐谱树，并为小节编号。
#[derive(Debug, Parser)]
#[command(name = "omr-app", version)]
struct Args {
    /// 配置文件路径，缺省时读取 `OMR_CONFIG` 或 `./config/default.toml`
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON 乐谱描述，缺省时使用配置中的路径或内置演示乐谱
    #[arg(long)]
    input: Option<PathBuf>,
    /// 谱表间隙归属策略
    #[arg(long, value_enum)]
    gap_policy: Option<GapPolicyArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GapPolicyArg {
    Midpoint,
    Above,
    Below,
}

impl From<GapPolicyArg> for StaffGapPolicy {
    fn from(arg: GapPolicyArg) -> Self {
        match arg {
            GapPolicyArg::Midpoint => StaffGapPolicy::Midpoint,
            GapPolicyArg::Above => StaffGapPolicy::Above,
            GapPolicyArg::Below => StaffGapPolicy::Below,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = load_configuration(args.config);
    init_logging(&config);
    info!("启动 OMR 乐谱装配工具");

    if let Some(policy) = args.gap_policy {
        config.assembly.staff_gap_policy = policy.into();
    }
    if let Some(input) = args.input {
        config.input.sheet = Some(input);
    }

    match cli::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "执行失败");
            eprintln!("错误: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    // 日志写入 stderr，stdout 只保留摘要
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
