//! wbi 签名：nav 接口下发两段 key，打乱后得到 mixin key，再用它对查询参数做 md5

use std::iter;

use anyhow::Result;
use reqwest::Method;
use serde::Deserialize;

use crate::bilibili::{Client, Credential, api_json};

/// 拼接后的 64 位 key 中依次取这些位置的字符
const MIXIN_ORDER: [usize; 32] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29, 28, 14, 39, 12, 38,
    41, 13,
];

/// 签名中不允许出现的字符
const RESERVED: &str = "!'()*";

#[derive(Debug, Deserialize)]
pub struct WbiKeys {
    img_url: String,
    sub_url: String,
}

impl WbiKeys {
    pub async fn fetch(client: &Client, credential: &Credential) -> Result<Self> {
        let mut body = api_json(client.request(
            Method::GET,
            "https://api.bilibili.com/x/web-interface/nav",
            Some(credential),
        ))
        .await?;
        Ok(serde_json::from_value(body["data"]["wbi_img"].take())?)
    }

    /// key 取自两个 url 的文件名，格式不符合预期时返回 None
    pub fn mixin_key(&self) -> Option<String> {
        let raw = format!("{}{}", file_stem(&self.img_url)?, file_stem(&self.sub_url)?);
        let raw = raw.as_bytes();
        if raw.len() < 64 {
            return None;
        }
        Some(MIXIN_ORDER.iter().map(|&i| char::from(raw[i])).collect())
    }
}

fn file_stem(url: &str) -> Option<&str> {
    let (_, file) = url.rsplit_once('/')?;
    file.rsplit_once('.').map(|(stem, _)| stem)
}

/// 为查询参数追加 wts 与 w_rid
pub fn sign<'a>(params: impl IntoIterator<Item = (&'a str, String)>, mixin_key: &str) -> Vec<(&'a str, String)> {
    sign_at(params, mixin_key, chrono::Local::now().timestamp())
}

fn sign_at<'a>(
    params: impl IntoIterator<Item = (&'a str, String)>,
    mixin_key: &str,
    wts: i64,
) -> Vec<(&'a str, String)> {
    let mut signed = params
        .into_iter()
        .map(|(key, value)| (key, value.chars().filter(|c| !RESERVED.contains(*c)).collect()))
        .chain(iter::once(("wts", wts.to_string())))
        .collect::<Vec<(&str, String)>>();
    signed.sort_unstable_by_key(|(key, _)| *key);
    // 只有字符串键值对，序列化不会失败；空格需要编码成 %20
    let query = serde_urlencoded::to_string(&signed)
        .unwrap_or_default()
        .replace('+', "%20");
    let digest = md5::compute(format!("{query}{mixin_key}"));
    signed.push(("w_rid", format!("{:x}", digest)));
    signed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixin_key() {
        let keys = WbiKeys {
            img_url: "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png".to_string(),
            sub_url: "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png".to_string(),
        };
        assert_eq!(keys.mixin_key().as_deref(), Some("ea1db124af3c7062474693fa704f4ff8"));
        let broken = WbiKeys {
            img_url: "https://i0.hdslb.com/bfs/wbi/short.png".to_string(),
            sub_url: "no_slash".to_string(),
        };
        assert_eq!(broken.mixin_key(), None);
    }

    #[test]
    fn test_sign() {
        let signed = sign_at(
            [
                ("foo", "114".to_string()),
                ("bar", "514".to_string()),
                ("zab", "1919810".to_string()),
            ],
            "ea1db124af3c7062474693fa704f4ff8",
            1702204169,
        );
        assert_eq!(
            signed,
            vec![
                ("bar", "514".to_string()),
                ("foo", "114".to_string()),
                ("wts", "1702204169".to_string()),
                ("zab", "1919810".to_string()),
                ("w_rid", "8f6f2b5b3d485fe1886cec6a0be8c5d4".to_string()),
            ]
        );
        // 保留字符在签名前被去掉
        let signed = sign_at([("q", "a(b)*".to_string())], "key", 1);
        assert_eq!(signed[0], ("q", "ab".to_string()));
    }
}
