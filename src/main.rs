use anyhow::{Context, Result};
use clap::{value_parser, Arg, Command};
use trainq::app::AppMode;
use trainq::common::{start_application, StartupConfig};
use trainq_config::ConfigOverrides;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("trainq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式训练任务队列与Worker协调服务")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(AppMode::NAMES)
                .default_value("worker"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时查找 config/trainq.toml"),
        )
        .arg(
            Arg::new("database-url")
                .long("database-url")
                .value_name("URL")
                .help("队列存储地址 (sqlite: 或 postgres://)"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("梯度与训练报告的输出目录"),
        )
        .arg(
            Arg::new("max-jobs")
                .long("max-jobs")
                .value_name("N")
                .help("Worker处理N个Job后退出")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let mode: AppMode = matches
        .get_one::<String>("mode")
        .context("缺少运行模式")?
        .parse()?;

    let startup = StartupConfig {
        mode,
        config_path: matches.get_one::<String>("config").cloned(),
        overrides: ConfigOverrides {
            database_url: matches.get_one::<String>("database-url").cloned(),
            output_dir: matches.get_one::<String>("output-dir").cloned(),
            max_jobs: matches.get_one::<u64>("max-jobs").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            log_format: matches.get_one::<String>("log-format").cloned(),
        },
    };

    start_application(startup).await
}
