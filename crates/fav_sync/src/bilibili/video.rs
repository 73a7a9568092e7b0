use anyhow::{Context, Result, bail};
use futures::TryStreamExt;
use futures::stream::FuturesUnordered;
use prost::Message;
use reqwest::{Method, header};
use serde::Deserialize;

use crate::bilibili::analyzer::PageAnalyzer;
use crate::bilibili::client::BiliClient;
use crate::bilibili::danmaku::{DanmakuElem, DanmakuWriter, DmSegMobileReply};
use crate::bilibili::{api_data, wbi};

/// bvid 第 4 位起的 9 个字符是 58 进制数
const BV_ALPHABET: &[u8; 58] = b"FcwAPNKTMug3GV5Lj7EJnHpWsx4tb8haYeviqBz6rkCy12mUSDQX9RdoZf";
const AID_MASK: u64 = (1 << 51) - 1;
const AID_XOR: u64 = 23442827791579;

/// 弹幕分段长度，单位秒
const DANMAKU_SEGMENT_SECS: u32 = 360;

/// 单个视频相关的接口，aid 由 bvid 本地换算
pub struct Video<'a> {
    client: &'a BiliClient,
    aid: String,
    bvid: String,
}

#[derive(Debug, Deserialize)]
pub struct Tag {
    pub tag_name: String,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct PageInfo {
    pub cid: i64,
    pub page: i32,
    #[serde(rename = "part")]
    pub name: String,
    pub duration: u32,
    pub first_frame: Option<String>,
    pub dimension: Option<Dimension>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
    pub rotate: u32,
}

impl<'a> Video<'a> {
    pub fn new(client: &'a BiliClient, bvid: &str) -> Result<Self> {
        Ok(Self {
            client,
            aid: bvid_to_aid(bvid)?.to_string(),
            bvid: bvid.to_owned(),
        })
    }

    fn ids(&self) -> [(&str, &str); 2] {
        [("aid", self.aid.as_str()), ("bvid", self.bvid.as_str())]
    }

    pub async fn pages(&self) -> Result<Vec<PageInfo>> {
        let request = self
            .client
            .request(Method::GET, "https://api.bilibili.com/x/player/pagelist")
            .await
            .query(&self.ids());
        api_data(request).await
    }

    pub async fn tags(&self) -> Result<Vec<String>> {
        let request = self
            .client
            .request(Method::GET, "https://api.bilibili.com/x/web-interface/view/detail/tag")
            .await
            .query(&self.ids());
        let tags: Vec<Tag> = api_data(request).await?;
        Ok(tags.into_iter().map(|tag| tag.tag_name).collect())
    }

    /// 并发拉取所有弹幕分段，合并后按出现时间排序
    pub async fn danmaku(&self, page: &PageInfo) -> Result<DanmakuWriter> {
        let segments = page.duration.div_ceil(DANMAKU_SEGMENT_SECS).max(1);
        let mut elems = (1..=segments)
            .map(|segment| self.danmaku_segment(page.cid, segment))
            .collect::<FuturesUnordered<_>>()
            .try_concat()
            .await?;
        elems.sort_by_key(|elem| elem.progress);
        // 无法渲染的高级弹幕直接丢弃
        let comments = elems.into_iter().filter_map(|elem| elem.try_into().ok()).collect();
        Ok(DanmakuWriter::new(page.clone(), comments))
    }

    async fn danmaku_segment(&self, cid: i64, segment: u32) -> Result<Vec<DanmakuElem>> {
        let res = self
            .client
            .request(Method::GET, "https://api.bilibili.com/x/v2/dm/web/seg.so")
            .await
            .query(&[("type", 1), ("oid", cid), ("segment_index", i64::from(segment))])
            .send()
            .await?
            .error_for_status()?;
        // 出错时接口返回 json 而不是 protobuf
        let is_protobuf = res
            .headers()
            .get(header::CONTENT_TYPE)
            .is_some_and(|v| v == "application/octet-stream");
        if !is_protobuf {
            let body = res.text().await.unwrap_or_default();
            bail!("danmaku segment {} of cid {} is not protobuf: {}", segment, cid, body);
        }
        Ok(DmSegMobileReply::decode(res.bytes().await?)?.elems)
    }

    /// 带 wbi 签名请求播放地址，fnval 4048 要求返回全部 dash 格式
    pub async fn play_info(&self, page: &PageInfo, mixin_key: &str) -> Result<PageAnalyzer> {
        let params = wbi::sign(
            [
                ("bvid", self.bvid.clone()),
                ("cid", page.cid.to_string()),
                ("qn", "127".to_owned()),
                ("otype", "json".to_owned()),
                ("fnval", "4048".to_owned()),
                ("fourk", "1".to_owned()),
            ],
            mixin_key,
        );
        let request = self
            .client
            .request(Method::GET, "https://api.bilibili.com/x/player/wbi/playurl")
            .await
            .query(&params);
        PageAnalyzer::new(api_data(request).await?)
    }
}

fn bvid_to_aid(bvid: &str) -> Result<u64> {
    let mut digits: [u8; 12] = bvid
        .as_bytes()
        .try_into()
        .ok()
        .with_context(|| format!("invalid bvid: {}", bvid))?;
    digits.swap(3, 9);
    digits.swap(4, 7);
    let mut value = 0u64;
    for digit in &digits[3..] {
        let idx = BV_ALPHABET
            .iter()
            .position(|c| c == digit)
            .with_context(|| format!("invalid bvid: {}", bvid))?;
        value = value * BV_ALPHABET.len() as u64 + idx as u64;
    }
    Ok((value & AID_MASK) ^ AID_XOR)
}
