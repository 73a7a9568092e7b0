use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::NaiveDate;
use leaky_bucket::RateLimiter;
use parking_lot::Once;
use reqwest::{Method, header};
use ua_generator::ua;

use crate::bilibili::danmaku::DanmakuOption;
use crate::bilibili::wbi::WbiKeys;
use crate::bilibili::{
    BestStream, Credential, FavoriteList, FilterOption, ListingPage, MediaPlatform, PageInfo, Video,
};
use crate::config::RateLimit;

/// 携带站点要求的默认请求头，接口请求与资源下载共用
#[derive(Clone)]
pub struct Client(reqwest::Client);

impl Client {
    pub fn new() -> Result<Self> {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            // 只关心进程内至少安装过一次，重复安装的 Err 可以忽略
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
        // 缺少 UA 或 Referer 时接口与资源链接都会返回 403
        let headers = header::HeaderMap::from_iter([
            (header::USER_AGENT, header::HeaderValue::from_static(ua::spoof_chrome_ua())),
            (header::REFERER, header::HeaderValue::from_static("https://www.bilibili.com")),
        ]);
        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true)
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self(inner))
    }

    pub fn request(&self, method: Method, url: &str, credential: Option<&Credential>) -> reqwest::RequestBuilder {
        let req = self.0.request(method, url);
        match credential {
            Some(credential) => req.header(header::COOKIE, credential.cookie_header()),
            None => req,
        }
    }
}

/// 进程内共享的远端客户端：持有凭据、限流器与按天缓存的 mixin key
pub struct BiliClient {
    pub client: Client,
    credential: ArcSwapOption<Credential>,
    limiter: Option<RateLimiter>,
    mixin_key: ArcSwapOption<(NaiveDate, String)>,
}

impl BiliClient {
    pub fn new(credential: Option<Credential>, rate_limit: Option<&RateLimit>) -> Result<Self> {
        let limiter = rate_limit.map(|RateLimit { limit, duration }| {
            RateLimiter::builder()
                .initial(*limit)
                .refill(*limit)
                .max(*limit)
                .interval(Duration::from_millis(*duration))
                .build()
        });
        Ok(Self {
            client: Client::new()?,
            credential: ArcSwapOption::from(credential.map(Arc::new)),
            limiter,
            mixin_key: ArcSwapOption::empty(),
        })
    }

    /// 先等待限流器放行，再带上当前凭据构建请求
    pub async fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        if let Some(limiter) = &self.limiter {
            limiter.acquire_one().await;
        }
        let credential = self.credential.load();
        self.client.request(method, url, credential.as_deref())
    }

    /// 获取当天的 mixin key，每天只会请求一次 nav 接口
    pub async fn mixin_key(&self) -> Result<String> {
        let today = chrono::Local::now().date_naive();
        if let Some(cached) = self.mixin_key.load().as_deref().filter(|cached| cached.0 == today) {
            return Ok(cached.1.clone());
        }
        let credential = self.credential.load_full().unwrap_or_default();
        let mixin_key = WbiKeys::fetch(&self.client, &credential)
            .await?
            .mixin_key()
            .context("failed to parse mixin key from wbi_img")?;
        self.mixin_key.store(Some(Arc::new((today, mixin_key.clone()))));
        Ok(mixin_key)
    }
}

#[async_trait]
impl MediaPlatform for BiliClient {
    async fn list_page(&self, fid: i64, page: u32) -> Result<ListingPage> {
        FavoriteList::new(self, fid).page(page).await
    }

    async fn fetch_pages(&self, bvid: &str) -> Result<Vec<PageInfo>> {
        Video::new(self, bvid)?.pages().await
    }

    async fn resolve_streams(&self, bvid: &str, page: &PageInfo, filter_option: &FilterOption) -> Result<BestStream> {
        let mixin_key = self.mixin_key().await?;
        Video::new(self, bvid)?
            .play_info(page, &mixin_key)
            .await?
            .best_stream(filter_option)
    }

    async fn fetch_tags(&self, bvid: &str) -> Result<Vec<String>> {
        Video::new(self, bvid)?.tags().await
    }

    async fn fetch_danmaku(&self, bvid: &str, page: &PageInfo, option: &DanmakuOption) -> Result<Vec<u8>> {
        Video::new(self, bvid)?
            .danmaku(page)
            .await?
            .render(option)
            .await
    }

    async fn need_refresh(&self) -> Result<bool> {
        let credential = self.credential.load_full().context("no credential configured")?;
        credential.need_refresh(&self.client).await
    }

    async fn refresh_credential(&self) -> Result<Credential> {
        let credential = self.credential.load_full().context("no credential configured")?;
        let new_credential = credential.refresh(&self.client).await?;
        self.credential.store(Some(Arc::new(new_credential.clone())));
        Ok(new_credential)
    }
}
