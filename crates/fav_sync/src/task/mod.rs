mod video_downloader;

use anyhow::Result;
use sea_orm::DatabaseConnection;
pub use video_downloader::{CredentialGate, CycleMode, SyncContext, run_cycle, video_downloader};

use crate::bilibili::BiliClient;
use crate::config::CONFIG;
use crate::downloader::Downloader;
use crate::mux::FfmpegMuxer;
use crate::processor::{ItemProcessor, ProcessOptions};
use crate::utils::model::collection_roots;
use crate::utils::path::PathResolver;

/// 按照当前配置组装条目处理器，收藏夹路径以数据库中的记录为准
pub async fn build_processor<'a>(
    bili_client: &'a BiliClient,
    downloader: &'a Downloader,
    muxer: &'a FfmpegMuxer,
    connection: &'a DatabaseConnection,
) -> Result<ItemProcessor<'a>> {
    let resolver = PathResolver::new(collection_roots(connection).await?, CONFIG.upper_path.clone());
    let options = ProcessOptions {
        filter_option: CONFIG.filter_option.clone(),
        danmaku_option: CONFIG.danmaku_option.clone(),
        nfo_time_type: CONFIG.nfo_time_type,
    };
    Ok(ItemProcessor::new(
        bili_client,
        downloader,
        muxer,
        resolver,
        options,
        connection,
    ))
}
