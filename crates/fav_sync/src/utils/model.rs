use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use fav_sync_entity::*;
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, QueryOrder, QuerySelect};

use crate::bilibili::{MediaItem, PageInfo};

/// 创建或更新收藏夹，返回数据库中的记录
pub async fn upsert_collection(
    fid: i64,
    name: &str,
    path: &Path,
    connection: &DatabaseConnection,
) -> Result<favorite::Model> {
    favorite::Entity::insert(favorite::ActiveModel {
        f_id: Set(fid),
        name: Set(name.to_owned()),
        path: Set(path.to_string_lossy().into_owned()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(favorite::Column::FId)
            .update_columns([favorite::Column::Name, favorite::Column::Path])
            .to_owned(),
    )
    .exec_without_returning(connection)
    .await?;
    favorite::Entity::find()
        .filter(favorite::Column::FId.eq(fid))
        .one(connection)
        .await?
        .with_context(|| format!("favorite {} not found after upsert", fid))
}

/// 创建或更新 up 主的名称与头像
pub async fn upsert_uppers(items: &[MediaItem], connection: &DatabaseConnection) -> Result<()> {
    let mut seen = HashSet::new();
    let uppers = items
        .iter()
        .filter(|item| seen.insert(item.upper.mid))
        .map(|item| upper::ActiveModel {
            mid: Set(item.upper.mid),
            name: Set(item.upper.name.clone()),
            face: Set(item.upper.face.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();
    if uppers.is_empty() {
        return Ok(());
    }
    upper::Entity::insert_many(uppers)
        .on_conflict(
            OnConflict::column(upper::Column::Mid)
                .update_columns([upper::Column::Name, upper::Column::Face])
                .to_owned(),
        )
        .exec_without_returning(connection)
        .await?;
    Ok(())
}

/// 创建或更新收藏夹中的条目，只刷新远端信息，不会修改 status、downloaded 与 tags
pub async fn upsert_entries(favorite_id: i32, items: &[MediaItem], connection: &DatabaseConnection) -> Result<()> {
    let entries = items
        .iter()
        .filter_map(|item| {
            let category = item.media_kind()?;
            Some(video::ActiveModel {
                favorite_id: Set(favorite_id),
                upper_id: Set(item.upper.mid),
                bvid: Set(item.bvid.clone()),
                name: Set(item.title.clone()),
                category: Set(category),
                intro: Set(item.intro.clone()),
                cover: Set(item.cover.clone()),
                ctime: Set(item.ctime.naive_utc()),
                pubtime: Set(item.pubtime.naive_utc()),
                favtime: Set(item.fav_time.naive_utc()),
                status: Set(MediaStatus::Normal),
                downloaded: Set(false),
                ..Default::default()
            })
        })
        .collect::<Vec<_>>();
    if entries.is_empty() {
        return Ok(());
    }
    video::Entity::insert_many(entries)
        .on_conflict(
            OnConflict::columns([video::Column::FavoriteId, video::Column::Bvid])
                .update_columns([
                    video::Column::UpperId,
                    video::Column::Name,
                    video::Column::Category,
                    video::Column::Intro,
                    video::Column::Cover,
                    video::Column::Ctime,
                    video::Column::Pubtime,
                    video::Column::Favtime,
                ])
                .to_owned(),
        )
        .exec_without_returning(connection)
        .await?;
    Ok(())
}

/// 查询当前页中已经存在于数据库的 (bvid, 收藏时间) 对
pub async fn existing_keys(
    favorite_id: i32,
    bvids: Vec<String>,
    connection: &DatabaseConnection,
) -> Result<HashSet<(String, NaiveDateTime)>> {
    Ok(video::Entity::find()
        .select_only()
        .columns([video::Column::Bvid, video::Column::Favtime])
        .filter(
            video::Column::FavoriteId
                .eq(favorite_id)
                .and(video::Column::Bvid.is_in(bvids)),
        )
        .into_tuple::<(String, NaiveDateTime)>()
        .all(connection)
        .await?
        .into_iter()
        .collect())
}

/// 筛选收藏夹中尚未下载的正常视频
pub async fn unresolved_entries(favorite_id: i32, connection: &DatabaseConnection) -> Result<Vec<video::Model>> {
    video::Entity::find()
        .filter(
            video::Column::FavoriteId
                .eq(favorite_id)
                .and(video::Column::Category.eq(MediaKind::Video))
                .and(video::Column::Status.eq(MediaStatus::Normal))
                .and(video::Column::Downloaded.eq(false)),
        )
        .order_by_desc(video::Column::Favtime)
        .all(connection)
        .await
        .context("filter unresolved entries failed")
}

/// 筛选所有已下载的正常视频
pub async fn downloaded_entries(connection: &DatabaseConnection) -> Result<Vec<video::Model>> {
    video::Entity::find()
        .filter(
            video::Column::Category
                .eq(MediaKind::Video)
                .and(video::Column::Status.eq(MediaStatus::Normal))
                .and(video::Column::Downloaded.eq(true)),
        )
        .all(connection)
        .await
        .context("filter downloaded entries failed")
}

pub async fn entry_pages(video_id: i32, connection: &DatabaseConnection) -> Result<Vec<page::Model>> {
    page::Entity::find()
        .filter(page::Column::VideoId.eq(video_id))
        .order_by_asc(page::Column::Pid)
        .all(connection)
        .await
        .context("query entry pages failed")
}

/// 创建或更新条目的分页，不会修改分页的下载状态
pub async fn upsert_pages(video_id: i32, pages: &[PageInfo], connection: &DatabaseConnection) -> Result<()> {
    if pages.is_empty() {
        return Ok(());
    }
    let models = pages
        .iter()
        .map(|p| {
            let (width, height) = match &p.dimension {
                // 旋转的视频需要交换宽高
                Some(d) if d.rotate == 0 => (Some(d.width), Some(d.height)),
                Some(d) => (Some(d.height), Some(d.width)),
                None => (None, None),
            };
            page::ActiveModel {
                video_id: Set(video_id),
                cid: Set(p.cid),
                pid: Set(p.page),
                name: Set(p.name.clone()),
                image: Set(p.first_frame.clone()),
                duration: Set(p.duration),
                width: Set(width),
                height: Set(height),
                status: Set(MediaStatus::Normal),
                downloaded: Set(false),
                ..Default::default()
            }
        })
        .collect::<Vec<_>>();
    for chunk in models.chunks(200) {
        page::Entity::insert_many(chunk.to_vec())
            .on_conflict(
                OnConflict::columns([page::Column::VideoId, page::Column::Pid])
                    .update_columns([
                        page::Column::Cid,
                        page::Column::Name,
                        page::Column::Image,
                        page::Column::Duration,
                        page::Column::Width,
                        page::Column::Height,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(connection)
            .await?;
    }
    Ok(())
}

pub async fn update_entry(entry: video::ActiveModel, connection: &DatabaseConnection) -> Result<video::Model> {
    Ok(entry.update(connection).await?)
}

pub async fn update_page(page: page::ActiveModel, connection: &DatabaseConnection) -> Result<page::Model> {
    Ok(page.update(connection).await?)
}

pub async fn find_upper(mid: i64, connection: &DatabaseConnection) -> Result<Option<upper::Model>> {
    Ok(upper::Entity::find_by_id(mid).one(connection).await?)
}

/// 数据库中收藏夹 id 到保存路径的映射
pub async fn collection_roots(connection: &DatabaseConnection) -> Result<HashMap<i32, PathBuf>> {
    Ok(favorite::Entity::find()
        .all(connection)
        .await?
        .into_iter()
        .map(|f| (f.id, PathBuf::from(f.path)))
        .collect())
}
