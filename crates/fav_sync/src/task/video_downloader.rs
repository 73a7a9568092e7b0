use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sea_orm::DatabaseConnection;
use tokio::time;

use crate::bilibili::{BiliClient, Credential, MediaPlatform};
use crate::config::{ARGS, CONFIG, CONFIG_DIR};
use crate::downloader::Downloader;
use crate::mux::FfmpegMuxer;
use crate::processor::ItemProcessor;
use crate::task::build_processor;
use crate::workflow::{Orchestrator, RunReport, sync_collection};

/// 每天至多检查一次凭据是否需要刷新，只有检查成功才推进日期
pub struct CredentialGate {
    anchor: NaiveDate,
    // 客户端已经换用但还没写进配置文件的凭据
    pending: Option<Credential>,
}

impl CredentialGate {
    /// 锚点设置为前一天，保证第一轮执行时就会检查
    pub fn new(today: NaiveDate) -> Self {
        Self {
            anchor: today.pred_opt().unwrap_or(today),
            pending: None,
        }
    }

    pub async fn check(
        &mut self,
        platform: &dyn MediaPlatform,
        today: NaiveDate,
        persist: impl Fn(&Credential) -> Result<()>,
    ) -> Result<()> {
        // 旧凭据刷新后即失效，上次没写入的凭据无论日期都要先补写
        if let Some(credential) = self.pending.as_ref() {
            persist(credential).context("failed to persist refreshed credential")?;
            info!("补写刷新后的凭据成功");
            self.pending = None;
        }
        if today <= self.anchor {
            return Ok(());
        }
        if platform.need_refresh().await? {
            info!("检测到凭据需要刷新，开始刷新..");
            let credential = platform.refresh_credential().await?;
            if let Err(e) = persist(&credential) {
                self.pending = Some(credential);
                return Err(e.context("failed to persist refreshed credential"));
            }
            info!("凭据刷新成功");
        }
        self.anchor = today;
        Ok(())
    }
}

/// 一轮同步需要的所有组件
pub struct SyncContext<'a> {
    pub platform: &'a dyn MediaPlatform,
    pub processor: &'a ItemProcessor<'a>,
    pub orchestrator: &'a Orchestrator,
    pub connection: &'a DatabaseConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// 常驻运行，每轮结束后等待 interval 秒
    Daemon,
    Once,
    /// 只执行一轮，且翻完收藏夹的所有分页
    Resync,
}

/// 执行一轮同步：检查凭据，然后依次处理所有收藏夹。凭据刷新失败时跳过本轮
pub async fn run_cycle(
    context: &SyncContext<'_>,
    gate: &mut CredentialGate,
    collections: &[(i64, PathBuf)],
    full_resync: bool,
    today: NaiveDate,
    persist: impl Fn(&Credential) -> Result<()>,
) -> Result<RunReport> {
    gate.check(context.platform, today, persist).await?;
    let mut total = RunReport::default();
    for (fid, root) in collections {
        match sync_collection(
            *fid,
            root,
            full_resync,
            context.platform,
            context.processor,
            context.orchestrator,
            context.connection,
        )
        .await
        {
            Ok(report) => {
                total.succeeded += report.succeeded;
                total.failed += report.failed;
            }
            Err(e) => error!("处理收藏夹 {} 时遇到错误：{:#}", fid, e),
        }
    }
    Ok(total)
}

/// 启动同步任务，Daemon 模式下永不返回
pub async fn video_downloader(connection: Arc<DatabaseConnection>, bili_client: Arc<BiliClient>, mode: CycleMode) -> Result<()> {
    let collections = CONFIG.favorite_roots()?;
    let downloader = Downloader::new(bili_client.client.clone());
    let muxer = FfmpegMuxer::new(ARGS.ffmpeg_path.as_str());
    let processor = build_processor(&bili_client, &downloader, &muxer, &connection).await?;
    let orchestrator = Orchestrator::new(CONFIG.concurrent_limit.video);
    let context = SyncContext {
        platform: bili_client.as_ref(),
        processor: &processor,
        orchestrator: &orchestrator,
        connection: &connection,
    };
    let config_path = CONFIG_DIR.join("config.toml");
    let persist = |credential: &Credential| CONFIG.update_credential(credential.clone(), &config_path);
    let mut gate = CredentialGate::new(chrono::Local::now().date_naive());
    loop {
        info!("开始执行本轮同步任务..");
        match run_cycle(
            &context,
            &mut gate,
            &collections,
            mode == CycleMode::Resync,
            chrono::Local::now().date_naive(),
            &persist,
        )
        .await
        {
            Ok(report) => info!(
                "本轮任务执行完毕，成功 {} 个，失败 {} 个",
                report.succeeded, report.failed
            ),
            Err(e) => error!("检查刷新凭据遇到错误：{:#}，跳过本轮执行", e),
        }
        if mode != CycleMode::Daemon {
            return Ok(());
        }
        info!("等待 {} 秒后进行下一轮同步", CONFIG.interval);
        time::sleep(time::Duration::from_secs(CONFIG.interval)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    use anyhow::bail;
    use parking_lot::Mutex;

    use super::*;
    use crate::bilibili::{FavoriteListInfo, ListingPage};
    use crate::database::setup_test_database;
    use crate::mux::tests::{FakeFetcher, FakeMuxer};
    use crate::processor::ProcessOptions;
    use crate::processor::tests::FakePlatform;
    use crate::utils::model::tests::media_item;
    use crate::utils::path::PathResolver;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[tokio::test]
    async fn test_credential_gate() {
        let platform = FakePlatform {
            need_refresh: true,
            ..Default::default()
        };
        let persisted = Mutex::new(Vec::new());
        let mut gate = CredentialGate::new(date(10));
        gate.check(&platform, date(10), |c| {
            persisted.lock().push(c.clone());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(persisted.lock().len(), 1);
        assert_eq!(persisted.lock()[0].sessdata, "new");
        // 同一天内不再检查
        gate.check(&platform, date(10), |_| bail!("should not be called"))
            .await
            .unwrap();
        assert_eq!(persisted.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_credential_gate_retries_after_failure() {
        let mut platform = FakePlatform {
            need_refresh: true,
            refresh_fails: true,
            ..Default::default()
        };
        let mut gate = CredentialGate::new(date(10));
        assert!(gate.check(&platform, date(10), |_| Ok(())).await.is_err());
        // 失败后锚点没有推进，同一天会再次尝试
        platform.refresh_fails = false;
        gate.check(&platform, date(10), |_| Ok(())).await.unwrap();
        assert!(platform.refreshed.load(Ordering::SeqCst));
        // 持久化失败同样不推进锚点
        let mut gate = CredentialGate::new(date(11));
        assert!(gate.check(&platform, date(11), |_| bail!("disk full")).await.is_err());
        assert!(gate.check(&platform, date(11), |_| Ok(())).await.is_ok());
    }

    #[tokio::test]
    async fn test_credential_rewritten_after_persist_failure() {
        let mut platform = FakePlatform {
            need_refresh: true,
            ..Default::default()
        };
        let mut gate = CredentialGate::new(date(10));
        assert!(gate.check(&platform, date(10), |_| bail!("disk full")).await.is_err());
        assert!(platform.refreshed.load(Ordering::SeqCst));

        // 客户端已经换用新凭据，远端不再要求刷新，但新凭据仍需写入配置文件
        platform.need_refresh = false;
        let persisted = Mutex::new(Vec::new());
        let record = |c: &Credential| {
            persisted.lock().push(c.sessdata.clone());
            Ok(())
        };
        gate.check(&platform, date(10), record).await.unwrap();
        assert_eq!(*persisted.lock(), vec!["new".to_owned()]);
        gate.check(&platform, date(11), record).await.unwrap();
        gate.check(&platform, date(11), record).await.unwrap();
        assert_eq!(persisted.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_aborts_when_refresh_fails() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let mut platform = FakePlatform {
            listing: vec![ListingPage {
                info: FavoriteListInfo {
                    id: 100,
                    title: "fav".to_owned(),
                },
                medias: vec![media_item("BV1", "a", 1, 1700000000)],
                has_more: false,
            }],
            need_refresh: true,
            refresh_fails: true,
            ..Default::default()
        };
        let (fetcher, muxer) = (FakeFetcher::default(), FakeMuxer::default());
        let orchestrator = Orchestrator::new(4);
        let collections = vec![(100, dir.path().join("fav"))];
        let mut gate = CredentialGate::new(date(10));
        {
            let processor = ItemProcessor::new(
                &platform,
                &fetcher,
                &muxer,
                PathResolver::new(HashMap::new(), dir.path().join("upper")),
                ProcessOptions::default(),
                &connection,
            );
            let context = SyncContext {
                platform: &platform,
                processor: &processor,
                orchestrator: &orchestrator,
                connection: &connection,
            };
            assert!(
                run_cycle(&context, &mut gate, &collections, false, date(10), |_| Ok(()))
                    .await
                    .is_err()
            );
            assert!(platform.list_calls.lock().is_empty());
        }

        platform.refresh_fails = false;
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            PathResolver::new(HashMap::new(), dir.path().join("upper")),
            ProcessOptions::default(),
            &connection,
        );
        let context = SyncContext {
            platform: &platform,
            processor: &processor,
            orchestrator: &orchestrator,
            connection: &connection,
        };
        let report = run_cycle(&context, &mut gate, &collections, false, date(10), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(report, RunReport { succeeded: 1, failed: 0 });
        assert!(dir.path().join("fav/BV1.mp4").exists());
    }

    #[tokio::test]
    async fn test_cycle_processes_every_collection() {
        let dir = tempfile::tempdir().unwrap();
        let connection = setup_test_database().await.unwrap();
        let platform = FakePlatform {
            listing: vec![ListingPage {
                info: FavoriteListInfo {
                    id: 100,
                    title: "fav".to_owned(),
                },
                medias: vec![media_item("BV1", "a", 1, 1700000000)],
                has_more: false,
            }],
            ..Default::default()
        };
        let (fetcher, muxer) = (FakeFetcher::default(), FakeMuxer::default());
        let orchestrator = Orchestrator::new(4);
        let processor = ItemProcessor::new(
            &platform,
            &fetcher,
            &muxer,
            PathResolver::new(HashMap::new(), dir.path().join("upper")),
            ProcessOptions::default(),
            &connection,
        );
        let context = SyncContext {
            platform: &platform,
            processor: &processor,
            orchestrator: &orchestrator,
            connection: &connection,
        };
        let mut gate = CredentialGate::new(date(10));
        // 假远端对任意 fid 返回同样的内容，同一视频在两个收藏夹中各自下载
        let collections = vec![(100, dir.path().join("a")), (200, dir.path().join("b"))];
        let report = run_cycle(&context, &mut gate, &collections, false, date(10), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(dir.path().join("a/BV1.mp4").exists());
        assert!(dir.path().join("b/BV1.mp4").exists());
    }
}
