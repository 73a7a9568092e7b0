use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "fav-sync", version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "None,fav_sync=info", env = "RUST_LOG")]
    pub log_level: String,

    #[arg(short, long, env = "FAV_SYNC_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "ffmpeg", env = "FAV_SYNC_FFMPEG_PATH")]
    pub ffmpeg_path: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 常驻运行，每隔 interval 秒同步一次所有收藏夹（默认）
    Daemon,
    /// 只同步一轮
    Once,
    /// 同步一轮，翻完所有分页而不在已知位置停止
    Resync,
    /// 检查已下载条目的视频文件是否仍然存在，不存在则重置下载状态
    Recheck,
    /// 为已下载的条目重新执行某一类子任务
    Refresh {
        #[arg(value_enum)]
        target: RefreshTarget,
        /// 执行前先删除对应的目标文件
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    Poster,
    Upper,
    Nfo,
    Video,
    Subtitle,
}
