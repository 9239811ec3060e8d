//! Notify CLI
//!
//! 命令行入口：发送通知、连通性检查、系统指标与 cron 校验。

use anyhow::Context;
use chrono::Utc;
use clap::Parser;

use notification_cli::cli::{Cli, CommandRunner, Commands, next_fire_times, report_outcomes};
use notifier_shared::config::AppConfig;

const SERVICE_NAME: &str = "notification-cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 优先使用环境变量 RUST_LOG，否则使用命令行参数指定的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // cron 校验不需要配置
    if let Commands::ValidateCron { expression, count } = &cli.command {
        let times = next_fire_times(expression, Utc::now(), *count)?;
        println!("✅ 表达式有效: {expression}");
        for (i, time) in times.iter().enumerate() {
            println!("  {}. {}", i + 1, time.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        return Ok(());
    }

    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    config.validate()?;
    let runner = CommandRunner::new(config);

    match cli.command {
        Commands::Send {
            message,
            chat_ids,
            parse_mode,
            file,
            caption,
        } => {
            let outcomes = runner
                .run_send(message, &chat_ids, parse_mode.as_deref(), file, caption)
                .await?;
            report_outcomes(&outcomes)?;
        }
        Commands::Test => runner.run_test().await?,
        Commands::Metrics { json } => runner.run_metrics(json).await?,
        Commands::System { chat_id } => {
            let outcomes = runner.run_system(chat_id).await?;
            report_outcomes(&outcomes)?;
        }
        Commands::ValidateCron { .. } => {}
    }

    Ok(())
}
