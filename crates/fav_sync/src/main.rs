#[macro_use]
extern crate tracing;

mod bilibili;
mod command;
mod config;
mod database;
mod downloader;
mod error;
mod mux;
mod processor;
mod task;
mod utils;
mod workflow;

use std::fmt::Debug;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bilibili::BiliClient;
use crate::config::{ARGS, CONFIG, CONFIG_DIR, Command};
use crate::database::{database_connection, migrate_database};
use crate::downloader::Downloader;
use crate::mux::FfmpegMuxer;
use crate::task::{CycleMode, build_processor, video_downloader};
use crate::utils::init_logger;
use crate::utils::signal::shutdown_signal;
use crate::workflow::Orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    init();
    if let Err(e) = CONFIG.check() {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }
    let connection = match setup_database().await {
        Ok(connection) => Arc::new(connection),
        Err(e) => {
            error!("初始化数据库失败：{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let credential = CONFIG.credential.load_full().map(|c| c.as_ref().clone());
    let bili_client = match BiliClient::new(credential, CONFIG.concurrent_limit.rate_limit.as_ref()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("初始化客户端失败：{:#}", e);
            close_database(connection).await;
            return ExitCode::FAILURE;
        }
    };
    let command = ARGS.command.clone().unwrap_or(Command::Daemon);
    match command {
        Command::Daemon => {
            let token = CancellationToken::new();
            let tracker = TaskTracker::new();
            spawn_task(
                "定时同步",
                video_downloader(connection.clone(), bili_client, CycleMode::Daemon),
                &tracker,
                token.clone(),
            );
            tracker.close();
            handle_shutdown(tracker, token).await;
        }
        Command::Once => run_once(video_downloader(connection.clone(), bili_client, CycleMode::Once)).await,
        Command::Resync => run_once(video_downloader(connection.clone(), bili_client, CycleMode::Resync)).await,
        Command::Recheck => {
            run_once(async {
                let (downloader, muxer) = components(&bili_client);
                let processor = build_processor(&bili_client, &downloader, &muxer, &connection).await?;
                command::recheck(&processor, &connection).await.map(|_| ())
            })
            .await
        }
        Command::Refresh { target, force } => {
            run_once(async {
                let (downloader, muxer) = components(&bili_client);
                let processor = build_processor(&bili_client, &downloader, &muxer, &connection).await?;
                let orchestrator = Orchestrator::new(CONFIG.concurrent_limit.video);
                command::refresh(&processor, &orchestrator, target, force, &connection)
                    .await
                    .map(|_| ())
            })
            .await
        }
    }
    close_database(connection).await;
    ExitCode::SUCCESS
}

/// 初始化日志系统，加载配置文件
fn init() {
    init_logger(&ARGS.log_level);
    info!("欢迎使用 fav-sync，当前程序版本：{}", env!("CARGO_PKG_VERSION"));
    Lazy::force(&CONFIG);
}

async fn setup_database() -> Result<DatabaseConnection> {
    migrate_database(&CONFIG_DIR).await?;
    database_connection(&CONFIG_DIR).await
}

fn components(bili_client: &BiliClient) -> (Downloader, FfmpegMuxer) {
    (
        Downloader::new(bili_client.client.clone()),
        FfmpegMuxer::new(ARGS.ffmpeg_path.as_str()),
    )
}

/// 任务结束后关闭数据库连接，此时不应该再有其它持有者
async fn close_database(connection: Arc<DatabaseConnection>) {
    match Arc::try_unwrap(connection) {
        Ok(connection) => {
            if let Err(e) = connection.close().await {
                error!("关闭数据库连接失败：{:#}", e);
            }
        }
        Err(_) => warn!("数据库连接仍被占用，跳过关闭"),
    }
}

fn spawn_task(
    task_name: &'static str,
    task: impl Future<Output = impl Debug> + Send + 'static,
    tracker: &TaskTracker,
    token: CancellationToken,
) {
    tracker.spawn(async move {
        tokio::select! {
            res = task => {
                error!("「{}」异常结束，返回结果为：「{:?}」，取消其它仍在执行的任务..", task_name, res);
                token.cancel();
            },
            _ = token.cancelled() => {
                info!("「{}」接收到取消信号，终止运行..", task_name);
            }
        }
    });
}

async fn handle_shutdown(tracker: TaskTracker, token: CancellationToken) {
    tokio::select! {
        _ = tracker.wait() => {
            error!("所有任务均已终止，程序退出")
        }
        name = wait_for_signal() => {
            info!("接收到 {} 信号，正在终止任务..", name);
            token.cancel();
            tracker.wait().await;
            info!("所有任务均已终止，程序退出");
        }
    }
}

/// 执行一次性的任务，收到终止信号时放弃执行中的任务，临时文件留给下次运行处理
async fn run_once(task: impl Future<Output = Result<()>>) {
    tokio::select! {
        res = task => {
            if let Err(e) = res {
                error!("任务执行失败：{:#}", e);
            }
        }
        name = wait_for_signal() => {
            info!("接收到 {} 信号，放弃执行中的任务..", name);
        }
    }
}

/// 无法监听信号时不提前退出，交给任务自己结束
async fn wait_for_signal() -> &'static str {
    match shutdown_signal().await {
        Ok(name) => name,
        Err(e) => {
            error!("监听终止信号失败：{:#}", e);
            std::future::pending().await
        }
    }
}
