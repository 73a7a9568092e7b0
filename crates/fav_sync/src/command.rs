use std::io::ErrorKind;

use anyhow::{Context, Result};
use fav_sync_entity::{page, video};
use sea_orm::ActiveValue::Set;
use sea_orm::DatabaseConnection;
use tokio::fs;

use crate::config::RefreshTarget;
use crate::processor::{ItemProcessor, ProcessFlags};
use crate::utils::model::{downloaded_entries, entry_pages, update_entry, update_page};
use crate::workflow::{Orchestrator, RunReport};

/// 检查已下载条目的视频文件，文件缺失的分页与条目会被重置为未下载，返回被重置的条目数
pub async fn recheck(processor: &ItemProcessor<'_>, connection: &DatabaseConnection) -> Result<usize> {
    let entries = downloaded_entries(connection).await?;
    info!("开始检查 {} 个已下载视频的文件..", entries.len());
    let mut reset = 0;
    for entry in entries {
        let pages = entry_pages(entry.id, connection).await?;
        let paths = processor.target_paths(&entry, &pages, RefreshTarget::Video)?;
        let mut missing = pages.is_empty();
        for (page, path) in pages.into_iter().zip(paths) {
            if fs::try_exists(&path).await? {
                continue;
            }
            warn!("视频 {} - {} 的文件 {} 不存在", entry.bvid, entry.name, path.display());
            missing = true;
            if page.downloaded {
                let mut active: page::ActiveModel = page.into();
                active.downloaded = Set(false);
                update_page(active, connection).await?;
            }
        }
        if missing {
            let (bvid, name) = (entry.bvid.clone(), entry.name.clone());
            let mut active: video::ActiveModel = entry.into();
            active.downloaded = Set(false);
            update_entry(active, connection)
                .await
                .with_context(|| format!("failed to reset {} - {}", bvid, name))?;
            reset += 1;
        }
    }
    info!("检查完毕，共重置 {} 个视频", reset);
    Ok(reset)
}

/// 为已下载的条目重新执行某一类子任务，force 时先删除对应的目标文件
pub async fn refresh(
    processor: &ItemProcessor<'_>,
    orchestrator: &Orchestrator,
    target: RefreshTarget,
    force: bool,
    connection: &DatabaseConnection,
) -> Result<RunReport> {
    let entries = downloaded_entries(connection).await?;
    if force {
        for entry in &entries {
            let pages = entry_pages(entry.id, connection).await?;
            for path in processor.target_paths(entry, &pages, target)? {
                match fs::remove_file(&path).await {
                    Ok(_) => debug!("删除文件 {}", path.display()),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e).with_context(|| format!("failed to remove {}", path.display())),
                }
            }
        }
    }
    info!("开始为 {} 个已下载视频重新执行 {:?} 任务..", entries.len(), target);
    let report = orchestrator
        .run_all(processor, entries, ProcessFlags::only(target))
        .await;
    info!("执行完毕，成功 {} 个，失败 {} 个", report.succeeded, report.failed);
    Ok(report)
}
