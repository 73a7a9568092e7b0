use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use anyhow::Result;
use fav_sync_entity::{favorite, video};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use sea_orm::DatabaseConnection;
use tokio::sync::Semaphore;

use crate::bilibili::MediaPlatform;
use crate::processor::{ItemProcessor, ProcessFlags};
use crate::utils::model::{existing_keys, unresolved_entries, upsert_collection, upsert_entries, upsert_uppers};

/// 一批条目的处理结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// 条目级的并发调度，所有收藏夹共享同一个信号量
pub struct Orchestrator {
    semaphore: Semaphore,
}

impl Orchestrator {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Semaphore::new(limit),
        }
    }

    /// 并发处理所有条目，单个条目的失败或 panic 不影响其它条目
    pub async fn run_all(
        &self,
        processor: &ItemProcessor<'_>,
        entries: Vec<video::Model>,
        flags: ProcessFlags,
    ) -> RunReport {
        let mut tasks = entries
            .into_iter()
            .map(|entry| async move {
                let Ok(_permit) = self.semaphore.acquire().await else {
                    error!("获取下载许可失败，跳过视频 {} - {}", entry.bvid, entry.name);
                    return false;
                };
                let (bvid, name) = (entry.bvid.clone(), entry.name.clone());
                match AssertUnwindSafe(processor.process(entry, flags)).catch_unwind().await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        error!("处理视频 {} - {} 失败：{:#}", bvid, name, e);
                        false
                    }
                    Err(_) => {
                        error!("处理视频 {} - {} 时发生 panic", bvid, name);
                        false
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();
        let mut report = RunReport::default();
        while let Some(ok) = tasks.next().await {
            if ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }
}

/// 同步一个收藏夹：先拉取新增条目，再处理所有未完成的条目
pub async fn sync_collection(
    fid: i64,
    root: &Path,
    full_resync: bool,
    platform: &dyn MediaPlatform,
    processor: &ItemProcessor<'_>,
    orchestrator: &Orchestrator,
    connection: &DatabaseConnection,
) -> Result<RunReport> {
    let favorite = refresh_collection(fid, root, full_resync, platform, connection).await?;
    processor.resolver().register(favorite.id, root.to_path_buf());
    let entries = unresolved_entries(favorite.id, connection).await?;
    if entries.is_empty() {
        info!("收藏夹 {} 没有需要处理的视频", favorite.name);
        return Ok(RunReport::default());
    }
    info!("开始处理收藏夹 {} 的 {} 个视频..", favorite.name, entries.len());
    let report = orchestrator.run_all(processor, entries, ProcessFlags::all()).await;
    info!(
        "收藏夹 {} 处理完毕，成功 {} 个，失败 {} 个",
        favorite.name, report.succeeded, report.failed
    );
    Ok(report)
}

/// 按收藏时间倒序翻页，遇到数据库中已有的条目即停止；full_resync 时翻完所有分页
pub async fn refresh_collection(
    fid: i64,
    root: &Path,
    full_resync: bool,
    platform: &dyn MediaPlatform,
    connection: &DatabaseConnection,
) -> Result<favorite::Model> {
    let first = platform.list_page(fid, 1).await?;
    let favorite = upsert_collection(fid, &first.info.title, root, connection).await?;
    info!("开始扫描收藏夹 {} - {} 的新视频..", fid, favorite.name);
    let (mut page, mut current, mut count) = (1, first, 0);
    loop {
        let keys = current
            .medias
            .iter()
            .map(|item| (item.bvid.clone(), item.fav_time.naive_utc()))
            .collect::<HashSet<_>>();
        let existing = existing_keys(
            favorite.id,
            current.medias.iter().map(|item| item.bvid.clone()).collect(),
            connection,
        )
        .await?;
        let reached = keys.intersection(&existing).next().is_some();
        for item in current.medias.iter().filter(|item| item.media_kind().is_none()) {
            warn!("跳过不支持的视频类型 {}：{} - {}", item.kind, item.bvid, item.title);
        }
        upsert_uppers(&current.medias, connection).await?;
        upsert_entries(favorite.id, &current.medias, connection).await?;
        count += current.medias.len();
        if (reached && !full_resync) || !current.has_more || current.medias.is_empty() {
            break;
        }
        page += 1;
        current = platform.list_page(fid, page).await?;
    }
    info!("扫描收藏夹 {} 完成，共获取 {} 页 {} 条记录", favorite.name, page, count);
    Ok(favorite)
}
