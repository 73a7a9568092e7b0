pub use analyzer::{AudioQuality, BestStream, FilterOption, PageAnalyzer, Stream, VideoCodecs, VideoQuality};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
pub use client::{BiliClient, Client};
pub use credential::Credential;
pub use danmaku::DanmakuOption;
pub use error::BiliError;
pub use favorite_list::{FavoriteList, FavoriteListInfo, ListingPage, MediaItem, Upper};
pub use video::{Dimension, PageInfo, Video};

mod analyzer;
mod client;
mod credential;
mod danmaku;
mod error;
mod favorite_list;
mod video;
mod wbi;

/// 风控时接口返回的错误码
const RISK_CONTROL_CODE: i64 = -352;

pub(crate) trait Validate {
    type Output;

    fn validate(self) -> Result<Self::Output>;
}

impl Validate for serde_json::Value {
    type Output = serde_json::Value;

    fn validate(self) -> Result<Self::Output> {
        let (code, msg) = match (self["code"].as_i64(), self["message"].as_str()) {
            (Some(code), Some(msg)) => (code, msg),
            _ => return Err(BiliError::InvalidResponse(self.to_string()).into()),
        };
        if code == RISK_CONTROL_CODE {
            return Err(BiliError::RiskControlOccurred(self.to_string()).into());
        }
        if code != 0 {
            return Err(BiliError::RequestFailed(code, msg.to_owned()).into());
        }
        Ok(self)
    }
}

/// 发送请求，校验业务错误码后返回完整的响应体
pub(crate) async fn api_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    request
        .send()
        .await?
        .error_for_status()?
        .json::<serde_json::Value>()
        .await?
        .validate()
}

/// 只取出响应体中的 data 字段
pub(crate) async fn api_data<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let mut body = api_json(request).await?;
    serde_json::from_value(body["data"].take()).context("unexpected response data")
}

/// 同步流程依赖的远端能力，所有失败都以 anyhow::Error 返回，
/// 业务错误码通过 downcast 到 BiliError 获取
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// 获取收藏夹列表的第 page 页（从 1 开始）
    async fn list_page(&self, fid: i64, page: u32) -> Result<ListingPage>;

    async fn fetch_pages(&self, bvid: &str) -> Result<Vec<PageInfo>>;

    async fn resolve_streams(&self, bvid: &str, page: &PageInfo, filter_option: &FilterOption) -> Result<BestStream>;

    async fn fetch_tags(&self, bvid: &str) -> Result<Vec<String>>;

    /// 获取分页的弹幕并渲染为 ASS 字幕内容
    async fn fetch_danmaku(&self, bvid: &str, page: &PageInfo, option: &DanmakuOption) -> Result<Vec<u8>>;

    async fn need_refresh(&self) -> Result<bool>;

    /// 刷新凭据，成功后新的凭据立即对后续请求生效，并返回给调用方持久化
    async fn refresh_credential(&self) -> Result<Credential>;
}
