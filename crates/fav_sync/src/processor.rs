use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use fav_sync_entity::{MediaStatus, page, video};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DatabaseConnection};
use tokio::fs;
use tokio::sync::Mutex;

use crate::bilibili::{DanmakuOption, Dimension, FilterOption, MediaPlatform, PageInfo};
use crate::config::{NFOTimeType, RefreshTarget};
use crate::downloader::AssetFetcher;
use crate::error::ExecutionStatus;
use crate::mux::{MuxPipeline, Muxer, TempPaths};
use crate::utils::file::write_file;
use crate::utils::model::{entry_pages, find_upper, update_entry, update_page, upsert_pages};
use crate::utils::nfo::{NFO, Show};
use crate::utils::path::{AssetKind, Part, PathResolver};
use crate::utils::status::{EntryState, classify, transition};

/// 处理条目时使用的配置，由调用方从配置文件中取出后传入
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub filter_option: FilterOption,
    pub danmaku_option: DanmakuOption,
    pub nfo_time_type: NFOTimeType,
}

/// 本次需要执行的子任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessFlags {
    pub upper: bool,
    pub tags: bool,
    pub poster: bool,
    pub nfo: bool,
    pub subtitle: bool,
    pub video: bool,
}

impl ProcessFlags {
    const NONE: Self = Self {
        upper: false,
        tags: false,
        poster: false,
        nfo: false,
        subtitle: false,
        video: false,
    };

    pub fn all() -> Self {
        Self {
            upper: true,
            tags: true,
            poster: true,
            nfo: true,
            subtitle: true,
            video: true,
        }
    }

    /// 只执行某一类子任务，用于手动刷新
    pub fn only(target: RefreshTarget) -> Self {
        let mut flags = Self::NONE;
        match target {
            RefreshTarget::Poster => flags.poster = true,
            RefreshTarget::Upper => flags.upper = true,
            RefreshTarget::Nfo => flags.nfo = true,
            RefreshTarget::Video => flags.video = true,
            RefreshTarget::Subtitle => flags.subtitle = true,
        }
        flags
    }
}

/// 单个条目的处理流程，每个子任务都以目标文件是否存在作为幂等依据
pub struct ItemProcessor<'a> {
    platform: &'a dyn MediaPlatform,
    fetcher: &'a dyn AssetFetcher,
    muxer: &'a dyn Muxer,
    resolver: PathResolver,
    options: ProcessOptions,
    connection: &'a DatabaseConnection,
    // 同一个 up 主的头像与 nfo 同时只允许一个条目写入
    upper_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl<'a> ItemProcessor<'a> {
    pub fn new(
        platform: &'a dyn MediaPlatform,
        fetcher: &'a dyn AssetFetcher,
        muxer: &'a dyn Muxer,
        resolver: PathResolver,
        options: ProcessOptions,
        connection: &'a DatabaseConnection,
    ) -> Self {
        Self {
            platform,
            fetcher,
            muxer,
            resolver,
            options,
            connection,
            upper_locks: DashMap::new(),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub async fn process(&self, mut entry: video::Model, flags: ProcessFlags) -> Result<()> {
        let mut failed = Vec::new();
        if flags.upper {
            let status = self.process_upper(&entry).await.into();
            report(&entry, "up 主信息", status, &mut failed);
        }
        let mut active: video::ActiveModel = entry.clone().into();
        if flags.tags && entry.tags.is_none() {
            match self.platform.fetch_tags(&entry.bvid).await {
                Ok(tags) => {
                    // 后续生成 nfo 时需要用到
                    entry.tags = Some(tags.into());
                    active.tags = Set(entry.tags.clone());
                }
                // 标签获取失败不影响后续流程，下一轮再试
                Err(e) => warn!("获取视频 {} - {} 的标签失败：{:#}", entry.bvid, entry.name, e),
            }
        }
        let current = EntryState::new(entry.status, entry.downloaded);
        let page_tasks = [
            (flags.poster, "封面"),
            (flags.nfo, "nfo"),
            (flags.subtitle, "弹幕"),
            (flags.video, "视频"),
        ];
        if page_tasks.iter().all(|(requested, _)| !requested) {
            self.persist(active, current, current).await?;
            return finish(failed);
        }
        let pages = match self.load_pages(&entry).await {
            Ok(pages) => pages,
            Err(e) => {
                let result: Result<()> = Err(e);
                let next = transition(current, &result);
                self.persist(active, current, next).await?;
                if next.status != current.status {
                    warn!(
                        "视频 {} - {} 已不可用，标记为 {}",
                        entry.bvid,
                        entry.name,
                        next.status.as_str()
                    );
                    return Ok(());
                }
                let Err(e) = result else {
                    return finish(failed);
                };
                // 依赖分页的子任务本轮都无法执行，全部记为失败
                for (requested, task_name) in page_tasks {
                    if requested {
                        error!("处理视频 {} - {} 的{}失败：无法获取分页", entry.bvid, entry.name, task_name);
                        failed.push(task_name);
                    }
                }
                return Err(e.context(format!("{} 个子任务失败：{}", failed.len(), failed.join("、"))));
            }
        };
        let multi = pages.len() > 1;
        if flags.poster {
            let status = self.process_poster(&entry, &pages, multi).await.into();
            report(&entry, "封面", status, &mut failed);
        }
        if flags.nfo {
            let status = self.process_nfo(&entry, &pages, multi).await.into();
            report(&entry, "nfo", status, &mut failed);
        }
        if flags.subtitle {
            let status = self.process_subtitle(&entry, &pages, multi).await.into();
            report(&entry, "弹幕", status, &mut failed);
        }
        let mut next = current;
        if flags.video {
            let result = self.process_video(&entry, pages, multi).await;
            next = transition(current, &result);
            if next.status != current.status {
                warn!(
                    "视频 {} - {} 已不可用，标记为 {}",
                    entry.bvid,
                    entry.name,
                    next.status.as_str()
                );
            } else {
                report(&entry, "视频", result.into(), &mut failed);
            }
        }
        self.persist(active, current, next).await?;
        finish(failed)
    }

    /// 所有子任务执行完毕后统一写回一次
    async fn persist(&self, mut active: video::ActiveModel, current: EntryState, next: EntryState) -> Result<()> {
        if next.status != current.status {
            active.status = Set(next.status);
        }
        if next.downloaded != current.downloaded {
            active.downloaded = Set(next.downloaded);
        }
        if active.is_changed() {
            update_entry(active, self.connection).await?;
        }
        Ok(())
    }

    /// 优先使用数据库中的分页，只有从未获取过时才请求远端
    pub async fn load_pages(&self, entry: &video::Model) -> Result<Vec<page::Model>> {
        let pages = entry_pages(entry.id, self.connection).await?;
        if !pages.is_empty() {
            return Ok(pages);
        }
        let infos = self.platform.fetch_pages(&entry.bvid).await?;
        if infos.is_empty() {
            bail!("no pages found for {}", entry.bvid);
        }
        upsert_pages(entry.id, &infos, self.connection).await?;
        entry_pages(entry.id, self.connection).await
    }

    async fn process_upper(&self, entry: &video::Model) -> Result<ExecutionStatus> {
        let lock = self.upper_locks.entry(entry.upper_id).or_default().clone();
        let _guard = lock.lock().await;
        let (face_path, nfo_path) = (
            self.resolver.upper_face(entry.upper_id),
            self.resolver.upper_nfo(entry.upper_id),
        );
        let (face_exists, nfo_exists) = tokio::try_join!(fs::try_exists(&face_path), fs::try_exists(&nfo_path))?;
        if face_exists && nfo_exists {
            return Ok(ExecutionStatus::Skipped);
        }
        let upper = find_upper(entry.upper_id, self.connection)
            .await?
            .with_context(|| format!("upper {} not found", entry.upper_id))?;
        if !face_exists {
            self.fetcher.fetch(&upper.face, &face_path).await?;
        }
        if !nfo_exists {
            let nfo = NFO::Upper((&upper).into()).to_xml()?;
            write_file(&nfo_path, nfo.as_bytes()).await?;
        }
        Ok(ExecutionStatus::Succeeded)
    }

    async fn process_poster(&self, entry: &video::Model, pages: &[page::Model], multi: bool) -> Result<ExecutionStatus> {
        let mut targets = vec![(
            entry.cover.clone(),
            self.resolver.resolve(entry, entry_part(multi), AssetKind::Poster)?,
        )];
        if multi {
            for page in pages {
                if let Some(image) = &page.image {
                    targets.push((
                        image.clone(),
                        self.resolver.resolve(entry, Part::Episode(page.pid), AssetKind::Poster)?,
                    ));
                }
            }
        }
        let mut status = ExecutionStatus::Skipped;
        for (url, path) in targets {
            if fs::try_exists(&path).await? {
                continue;
            }
            self.fetcher.fetch(&url, &path).await?;
            status = ExecutionStatus::Succeeded;
        }
        Ok(status)
    }

    async fn process_nfo(&self, entry: &video::Model, pages: &[page::Model], multi: bool) -> Result<ExecutionStatus> {
        let upper_name = find_upper(entry.upper_id, self.connection)
            .await?
            .map(|upper| upper.name)
            .unwrap_or_default();
        let show = Show::new(entry, &upper_name, self.options.nfo_time_type);
        let mut documents = vec![(
            self.resolver.resolve(entry, entry_part(multi), AssetKind::Nfo)?,
            if multi { NFO::TVShow(show) } else { NFO::Movie(show) },
        )];
        if multi {
            for page in pages {
                documents.push((
                    self.resolver.resolve(entry, Part::Episode(page.pid), AssetKind::Nfo)?,
                    NFO::Episode(page.into()),
                ));
            }
        }
        let mut status = ExecutionStatus::Skipped;
        for (path, nfo) in documents {
            if fs::try_exists(&path).await? {
                continue;
            }
            write_file(&path, nfo.to_xml()?.as_bytes()).await?;
            status = ExecutionStatus::Succeeded;
        }
        Ok(status)
    }

    async fn process_subtitle(
        &self,
        entry: &video::Model,
        pages: &[page::Model],
        multi: bool,
    ) -> Result<ExecutionStatus> {
        let mut status = ExecutionStatus::Skipped;
        for page in pages.iter().filter(|p| p.status == MediaStatus::Normal) {
            let path = self.resolver.resolve(entry, page_part(multi, page), AssetKind::Subtitle)?;
            if fs::try_exists(&path).await? {
                continue;
            }
            let content = self
                .platform
                .fetch_danmaku(&entry.bvid, &page_info(page), &self.options.danmaku_option)
                .await?;
            write_file(&path, &content).await?;
            status = ExecutionStatus::Succeeded;
        }
        Ok(status)
    }

    /// 逐个处理分页的视频，分页各自记录状态；条目的结果取所有分页的汇总
    async fn process_video(&self, entry: &video::Model, pages: Vec<page::Model>, multi: bool) -> Result<ExecutionStatus> {
        let mut status = ExecutionStatus::Skipped;
        let (mut transient, mut terminal): (Option<anyhow::Error>, Option<anyhow::Error>) = (None, None);
        for page in pages {
            if page.status != MediaStatus::Normal {
                continue;
            }
            let result = self.process_page_video(entry, &page, page_part(multi, &page)).await;
            let current = EntryState::new(page.status, page.downloaded);
            let next = transition(current, &result);
            if next != current {
                let pid = page.pid;
                let mut active: page::ActiveModel = page.into();
                active.status = Set(next.status);
                active.downloaded = Set(next.downloaded);
                update_page(active, self.connection)
                    .await
                    .with_context(|| format!("failed to update page {}", pid))?;
            }
            match result {
                Ok(ExecutionStatus::Succeeded) => status = ExecutionStatus::Succeeded,
                Ok(_) => {}
                Err(e) => {
                    if multi {
                        error!("处理视频 {} - {} 的分页失败：{:#}", entry.bvid, entry.name, e);
                    }
                    let slot = if classify(&e).is_some() {
                        &mut terminal
                    } else {
                        &mut transient
                    };
                    slot.get_or_insert(e);
                }
            }
        }
        // 只要还有分页可以重试，条目就保持正常状态，等下一轮
        match transient.or(terminal) {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }

    async fn process_page_video(&self, entry: &video::Model, page: &page::Model, part: Part) -> Result<ExecutionStatus> {
        let final_path = self.resolver.resolve(entry, part, AssetKind::Video)?;
        if fs::try_exists(&final_path).await? {
            return Ok(ExecutionStatus::Skipped);
        }
        let streams = self
            .platform
            .resolve_streams(&entry.bvid, &page_info(page), &self.options.filter_option)
            .await
            .with_context(|| format!("failed to resolve streams of page {}", page.pid))?;
        let temp = TempPaths {
            video: self.resolver.resolve(entry, part, AssetKind::TempVideo)?,
            audio: self.resolver.resolve(entry, part, AssetKind::TempAudio)?,
        };
        MuxPipeline::new(self.fetcher, self.muxer)
            .fetch_and_mux(&streams, &temp, &final_path)
            .await?;
        Ok(ExecutionStatus::Succeeded)
    }

    /// 某类子任务对应的全部目标文件，用于强制刷新与文件检查
    pub fn target_paths(&self, entry: &video::Model, pages: &[page::Model], target: RefreshTarget) -> Result<Vec<PathBuf>> {
        let multi = pages.len() > 1;
        let mut paths = Vec::new();
        match target {
            RefreshTarget::Upper => {
                paths.push(self.resolver.upper_face(entry.upper_id));
                paths.push(self.resolver.upper_nfo(entry.upper_id));
            }
            RefreshTarget::Poster | RefreshTarget::Nfo => {
                let kind = if target == RefreshTarget::Poster {
                    AssetKind::Poster
                } else {
                    AssetKind::Nfo
                };
                paths.push(self.resolver.resolve(entry, entry_part(multi), kind)?);
                if multi {
                    for page in pages {
                        paths.push(self.resolver.resolve(entry, Part::Episode(page.pid), kind)?);
                    }
                }
            }
            RefreshTarget::Video | RefreshTarget::Subtitle => {
                let kind = if target == RefreshTarget::Video {
                    AssetKind::Video
                } else {
                    AssetKind::Subtitle
                };
                for page in pages {
                    paths.push(self.resolver.resolve(entry, page_part(multi, page), kind)?);
                }
            }
        }
        Ok(paths)
    }
}

fn entry_part(multi: bool) -> Part {
    if multi { Part::Show } else { Part::Single }
}

fn page_part(multi: bool, page: &page::Model) -> Part {
    if multi { Part::Episode(page.pid) } else { Part::Single }
}

fn page_info(page: &page::Model) -> PageInfo {
    PageInfo {
        cid: page.cid,
        page: page.pid,
        name: page.name.clone(),
        duration: page.duration,
        first_frame: page.image.clone(),
        dimension: match (page.width, page.height) {
            (Some(width), Some(height)) => Some(Dimension {
                width,
                height,
                rotate: 0,
            }),
            _ => None,
        },
    }
}

fn finish(failed: Vec<&'static str>) -> Result<()> {
    if !failed.is_empty() {
        bail!("{} 个子任务失败：{}", failed.len(), failed.join("、"));
    }
    Ok(())
}

fn report(entry: &video::Model, task_name: &'static str, status: ExecutionStatus, failed: &mut Vec<&'static str>) {
    match status {
        ExecutionStatus::Skipped => debug!("视频 {} - {} 的{}已存在，跳过", entry.bvid, entry.name, task_name),
        ExecutionStatus::Succeeded => info!("处理视频 {} - {} 的{}成功", entry.bvid, entry.name, task_name),
        ExecutionStatus::Failed(e) => {
            error!("处理视频 {} - {} 的{}失败：{:#}", entry.bvid, entry.name, task_name, e);
            failed.push(task_name);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use fav_sync_entity::favorite;
    use parking_lot::Mutex as SyncMutex;
    use sea_orm::EntityTrait;

    use super::*;
    use crate::bilibili::{
        AudioQuality, BestStream, BiliError, Credential, ListingPage, Stream, VideoCodecs, VideoQuality,
    };
    use crate::database::setup_test_database;
    use crate::mux::tests::{FakeFetcher, FakeMuxer};
    use crate::utils::model::tests::media_item;
    use crate::utils::model::{upsert_collection, upsert_entries, upsert_uppers};

    /// 记录调用次数的假远端
    #[derive(Default)]
    pub struct FakePlatform {
        pub listing: Vec<ListingPage>,
        pub list_calls: SyncMutex<Vec<u32>>,
        pub pages: HashMap<String, Vec<PageInfo>>,
        /// bvid 到错误码的映射，resolve_streams 会返回对应的错误
        pub resolve_errors: HashMap<String, i64>,
        /// (bvid, 分页序号) 到错误码的映射
        pub page_errors: HashMap<(String, i32), i64>,
        pub pages_fail: bool,
        pub resolve_calls: AtomicUsize,
        pub page_calls: AtomicUsize,
        pub tag_calls: AtomicUsize,
        pub delay: Option<Duration>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub need_refresh: bool,
        pub refresh_fails: bool,
        pub refreshed: AtomicBool,
    }

    #[async_trait]
    impl MediaPlatform for FakePlatform {
        async fn list_page(&self, _fid: i64, page: u32) -> Result<ListingPage> {
            self.list_calls.lock().push(page);
            self.listing
                .get(page as usize - 1)
                .cloned()
                .with_context(|| format!("page {} out of range", page))
        }

        async fn fetch_pages(&self, bvid: &str) -> Result<Vec<PageInfo>> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            if self.pages_fail {
                bail!("connection reset");
            }
            Ok(self.pages.get(bvid).cloned().unwrap_or_else(|| {
                vec![PageInfo {
                    cid: 1,
                    page: 1,
                    name: "P1".to_owned(),
                    duration: 10,
                    ..Default::default()
                }]
            }))
        }

        async fn resolve_streams(&self, bvid: &str, page: &PageInfo, _filter: &FilterOption) -> Result<BestStream> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let code = self
                .resolve_errors
                .get(bvid)
                .or_else(|| self.page_errors.get(&(bvid.to_owned(), page.page)));
            if let Some(code) = code {
                return Err(BiliError::RequestFailed(*code, "error".to_owned()).into());
            }
            Ok(BestStream::VideoAudio {
                video: Stream::DashVideo {
                    url: format!("https://example.com/{bvid}/video.m4s"),
                    quality: VideoQuality::Quality1080p,
                    codecs: VideoCodecs::AVC,
                },
                audio: Some(Stream::DashAudio {
                    url: format!("https://example.com/{bvid}/audio.m4s"),
                    quality: AudioQuality::Quality192k,
                }),
            })
        }

        async fn fetch_tags(&self, _bvid: &str) -> Result<Vec<String>> {
            self.tag_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["tag".to_owned()])
        }

        async fn fetch_danmaku(&self, _bvid: &str, _page: &PageInfo, _option: &DanmakuOption) -> Result<Vec<u8>> {
            Ok(b"[Script Info]".to_vec())
        }

        async fn need_refresh(&self) -> Result<bool> {
            Ok(self.need_refresh)
        }

        async fn refresh_credential(&self) -> Result<Credential> {
            if self.refresh_fails {
                bail!("refresh failed");
            }
            self.refreshed.store(true, Ordering::SeqCst);
            Ok(Credential {
                sessdata: "new".to_owned(),
                ..Default::default()
            })
        }
    }

    /// 创建收藏夹并写入条目，返回收藏夹记录
    pub async fn prepare_entries(
        connection: &DatabaseConnection,
        bvids: &[&str],
    ) -> favorite::Model {
        let favorite = upsert_collection(100, "fav", Path::new("/fav"), connection)
            .await
            .unwrap();
        let items = bvids
            .iter()
            .enumerate()
            .map(|(i, bvid)| media_item(bvid, bvid, 1, 1700000000 + i as i64))
            .collect::<Vec<_>>();
        upsert_uppers(&items, connection).await.unwrap();
        upsert_entries(favorite.id, &items, connection).await.unwrap();
        favorite
    }

    pub fn resolver(dir: &Path, favorite_id: i32) -> PathResolver {
        PathResolver::new(
            HashMap::from([(favorite_id, dir.join("fav"))]),
            dir.join("upper"),
        )
    }

    async fn find_entry(connection: &DatabaseConnection, bvid: &str) -> video::Model {
        video::Entity::find()
            .all(connection)
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.bvid == bvid)
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1"]).await;
        let (platform, fetcher, muxer) = (FakePlatform::default(), FakeFetcher::default(), FakeMuxer::default());
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        let entry = find_entry(&connection, "BV1").await;
        processor.process(entry, ProcessFlags::all()).await.unwrap();

        let entry = find_entry(&connection, "BV1").await;
        assert!(entry.downloaded);
        assert_eq!(entry.status, MediaStatus::Normal);
        assert_eq!(entry.tags.clone().map(Vec::from), Some(vec!["tag".to_owned()]));
        let root = dir.path().join("fav");
        for file in ["BV1.mp4", "BV1.nfo", "BV1-poster.jpg", "BV1.zh-CN.default.ass"] {
            assert!(root.join(file).exists(), "{} should exist", file);
        }
        assert!(dir.path().join("upper/1/1/folder.jpg").exists());
        assert!(dir.path().join("upper/1/1/person.nfo").exists());
        assert!(!root.join("tmp_BV1_video").exists());
        // 同一轮获取的标签要写进 nfo
        let nfo = std::fs::read_to_string(root.join("BV1.nfo")).unwrap();
        assert!(nfo.contains("<title>BV1</title>"));
        assert!(nfo.contains("<genre>tag</genre>"));
        // 头像、封面、视频、音频
        assert_eq!(fetcher.calls.lock().len(), 4);
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(platform.resolve_calls.load(Ordering::SeqCst), 1);

        // 第二次处理时所有文件都已存在，不应发生任何网络请求与封装
        processor.process(entry, ProcessFlags::all()).await.unwrap();
        assert_eq!(fetcher.calls.lock().len(), 4);
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(platform.resolve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(platform.page_calls.load(Ordering::SeqCst), 1);
        assert_eq!(platform.tag_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_video_marks_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1"]).await;
        let (platform, fetcher, muxer) = (FakePlatform::default(), FakeFetcher::default(), FakeMuxer::default());
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        write_file(&dir.path().join("fav/BV1.mp4"), b"video").await.unwrap();
        let entry = find_entry(&connection, "BV1").await;
        processor.process(entry, ProcessFlags::only(RefreshTarget::Video)).await.unwrap();
        assert!(find_entry(&connection, "BV1").await.downloaded);
        assert_eq!(platform.resolve_calls.load(Ordering::SeqCst), 0);
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1", "BV2", "BV3"]).await;
        let platform = FakePlatform {
            resolve_errors: HashMap::from([
                ("BV1".to_owned(), -404),
                ("BV2".to_owned(), 62002),
                ("BV3".to_owned(), -500),
            ]),
            ..Default::default()
        };
        let (fetcher, muxer) = (FakeFetcher::default(), FakeMuxer::default());
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        let flags = ProcessFlags::only(RefreshTarget::Video);
        processor
            .process(find_entry(&connection, "BV1").await, flags)
            .await
            .unwrap();
        processor
            .process(find_entry(&connection, "BV2").await, flags)
            .await
            .unwrap();
        // 未知错误码是临时错误，会向上报告
        assert!(
            processor
                .process(find_entry(&connection, "BV3").await, flags)
                .await
                .is_err()
        );

        let deleted = find_entry(&connection, "BV1").await;
        assert_eq!((deleted.status, deleted.downloaded), (MediaStatus::Deleted, false));
        let pages = entry_pages(deleted.id, &connection).await.unwrap();
        assert_eq!(pages[0].status, MediaStatus::Deleted);
        let invisible = find_entry(&connection, "BV2").await;
        assert_eq!((invisible.status, invisible.downloaded), (MediaStatus::Invisible, false));
        let transient = find_entry(&connection, "BV3").await;
        assert_eq!((transient.status, transient.downloaded), (MediaStatus::Normal, false));
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_multi_part_entry() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1"]).await;
        let platform = FakePlatform {
            pages: HashMap::from([(
                "BV1".to_owned(),
                (1..=2)
                    .map(|pid| PageInfo {
                        cid: pid as i64,
                        page: pid,
                        name: format!("P{pid}"),
                        duration: 10,
                        first_frame: Some(format!("https://example.com/{pid}.jpg")),
                        dimension: None,
                    })
                    .collect(),
            )]),
            ..Default::default()
        };
        let (fetcher, muxer) = (FakeFetcher::default(), FakeMuxer::default());
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        processor
            .process(find_entry(&connection, "BV1").await, ProcessFlags::all())
            .await
            .unwrap();
        let show = dir.path().join("fav/BV1");
        for file in [
            "poster.jpg",
            "tvshow.nfo",
            "Season 1/BV1 - S01E01.mp4",
            "Season 1/BV1 - S01E02.mp4",
            "Season 1/BV1 - S01E02.nfo",
            "Season 1/BV1 - S01E02-thumb.jpg",
            "Season 1/BV1 - S01E01.zh-CN.default.ass",
        ] {
            assert!(show.join(file).exists(), "{} should exist", file);
        }
        let entry = find_entry(&connection, "BV1").await;
        assert!(entry.downloaded);
        let pages = entry_pages(entry.id, &connection).await.unwrap();
        assert!(pages.iter().all(|p| p.downloaded));
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 2);
        assert_eq!(processor.target_paths(&entry, &pages, RefreshTarget::Video).unwrap().len(), 2);
        assert_eq!(processor.target_paths(&entry, &pages, RefreshTarget::Nfo).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mux_failure_retried_next_round() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1"]).await;
        let (platform, fetcher) = (FakePlatform::default(), FakeFetcher::default());
        let broken = FakeMuxer {
            fail: true,
            ..Default::default()
        };
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &broken,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        let flags = ProcessFlags::only(RefreshTarget::Video);
        assert!(processor.process(find_entry(&connection, "BV1").await, flags).await.is_err());
        let entry = find_entry(&connection, "BV1").await;
        assert_eq!((entry.status, entry.downloaded), (MediaStatus::Normal, false));
        let root = dir.path().join("fav");
        // 封装失败不会留下看起来已完成的视频文件，下载好的流保留给下一轮
        assert!(!root.join("BV1.mp4").exists());
        assert!(!root.join("BV1.mp4.part").exists());
        assert!(root.join("tmp_BV1_video").exists());
        assert!(root.join("tmp_BV1_audio").exists());

        let muxer = FakeMuxer::default();
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        processor.process(entry, flags).await.unwrap();
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 1);
        assert!(find_entry(&connection, "BV1").await.downloaded);
        assert_eq!(std::fs::read(root.join("BV1.mp4")).unwrap(), b"muxed");
        assert!(!root.join("tmp_BV1_video").exists());
    }

    #[tokio::test]
    async fn test_page_list_failure() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1"]).await;
        let platform = FakePlatform {
            pages_fail: true,
            ..Default::default()
        };
        let (fetcher, muxer) = (FakeFetcher::default(), FakeMuxer::default());
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        // 只刷新 up 主信息时不需要分页
        processor
            .process(find_entry(&connection, "BV1").await, ProcessFlags::only(RefreshTarget::Upper))
            .await
            .unwrap();
        assert_eq!(platform.page_calls.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("upper/1/1/person.nfo").exists());

        let err = processor
            .process(find_entry(&connection, "BV1").await, ProcessFlags::all())
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        for task_name in ["封面", "nfo", "弹幕", "视频"] {
            assert!(message.contains(task_name), "{} should be reported", task_name);
        }
        assert!(message.contains("connection reset"));
        let entry = find_entry(&connection, "BV1").await;
        assert_eq!((entry.status, entry.downloaded), (MediaStatus::Normal, false));
        // 标签在分页之前获取，仍然会被保存
        assert_eq!(entry.tags.map(Vec::from), Some(vec!["tag".to_owned()]));
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_page_failure_keeps_entry_normal() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let favorite = prepare_entries(&connection, &["BV1"]).await;
        let platform = FakePlatform {
            pages: HashMap::from([(
                "BV1".to_owned(),
                (1..=3)
                    .map(|pid| PageInfo {
                        cid: pid as i64,
                        page: pid,
                        name: format!("P{pid}"),
                        duration: 10,
                        ..Default::default()
                    })
                    .collect(),
            )]),
            page_errors: HashMap::from([(("BV1".to_owned(), 1), -404), (("BV1".to_owned(), 2), -500)]),
            ..Default::default()
        };
        let (fetcher, muxer) = (FakeFetcher::default(), FakeMuxer::default());
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            resolver(dir.path(), favorite.id),
            ProcessOptions::default(),
            &connection,
        );
        let flags = ProcessFlags::only(RefreshTarget::Video);
        assert!(processor.process(find_entry(&connection, "BV1").await, flags).await.is_err());
        // 第二个分页只是临时失败，条目不能因为第一个分页被删除而进入终止状态
        let entry = find_entry(&connection, "BV1").await;
        assert_eq!((entry.status, entry.downloaded), (MediaStatus::Normal, false));
        let pages = entry_pages(entry.id, &connection).await.unwrap();
        let states = pages.iter().map(|p| (p.pid, p.status, p.downloaded)).collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                (1, MediaStatus::Deleted, false),
                (2, MediaStatus::Normal, false),
                (3, MediaStatus::Normal, true),
            ]
        );
        assert_eq!(muxer.invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_process_flags() {
        assert_eq!(
            ProcessFlags::only(RefreshTarget::Subtitle),
            ProcessFlags {
                subtitle: true,
                ..ProcessFlags::NONE
            }
        );
        assert!(ProcessFlags::all().video && ProcessFlags::all().tags);
    }
}
