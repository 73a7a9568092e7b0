use anyhow::{Context, Result};
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use fav_sync_entity::MediaKind;
use reqwest::Method;
use serde::{Deserialize, Deserializer};

use crate::bilibili::{BiliClient, api_data};

/// 每页条目数，与网页端一致
pub const PAGE_SIZE: u32 = 20;

pub struct FavoriteList<'a> {
    client: &'a BiliClient,
    fid: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FavoriteListInfo {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Upper {
    pub mid: i64,
    pub name: String,
    pub face: String,
}

/// 收藏夹列表接口中的单个条目
#[derive(Debug, Clone, Deserialize)]
pub struct MediaItem {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: i32,
    pub bvid: String,
    pub intro: String,
    pub cover: String,
    pub upper: Upper,
    #[serde(with = "ts_seconds")]
    pub ctime: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub pubtime: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    pub fav_time: DateTime<Utc>,
    #[serde(default)]
    pub attr: i32,
}

impl MediaItem {
    pub fn media_kind(&self) -> Option<MediaKind> {
        MediaKind::from_code(self.kind)
    }
}

/// 收藏夹列表的一页
#[derive(Debug, Clone, Deserialize)]
pub struct ListingPage {
    pub info: FavoriteListInfo,
    // 空收藏夹的 medias 是 null 而非空数组
    #[serde(default, deserialize_with = "null_as_empty")]
    pub medias: Vec<MediaItem>,
    #[serde(default)]
    pub has_more: bool,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl<'a> FavoriteList<'a> {
    pub fn new(client: &'a BiliClient, fid: i64) -> Self {
        Self { client, fid }
    }

    /// 按收藏时间倒序的第 page 页
    pub async fn page(&self, page: u32) -> Result<ListingPage> {
        let (fid, pn, ps) = (self.fid.to_string(), page.to_string(), PAGE_SIZE.to_string());
        let request = self
            .client
            .request(Method::GET, "https://api.bilibili.com/x/v3/fav/resource/list")
            .await
            .query(&[
                ("media_id", fid.as_str()),
                ("pn", pn.as_str()),
                ("ps", ps.as_str()),
                ("order", "mtime"),
                ("type", "0"),
                ("tid", "0"),
                ("platform", "web"),
            ]);
        api_data(request)
            .await
            .with_context(|| format!("failed to fetch page {} of favorite {}", page, self.fid))
    }
}
