use anyhow::{Context, Result, ensure};
use cookie::Cookie;
use regex::Regex;
use reqwest::{Method, header};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::bilibili::{Client, Validate, api_json};

/// 生成 correspond path 使用的公钥
const CORRESPOND_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDLgd2OAkcGVtoE3ThUREbio0Eg
Uc/prcajMKXvkCKFCWhJYJcLkcM2DKKcSeFpD/j6Boy538YXnR6VhcuUJOhH2x71
nzPjfdTcqMz7djHum0qSZA0AyCBDABUqCrfNgCiJ00Ra7GmRj+YCK1NJEuewlb40
JNrRuoEUXpabUzGB8QIDAQAB
-----END PUBLIC KEY-----";

const REFRESH_CSRF_PATTERN: &str = r#"<div id="1-name">(.+?)</div>"#;

/// 会话凭据，五个字段都来自登录后浏览器中的 cookie
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: String,
    pub dedeuserid: String,
    pub ac_time_value: String,
}

impl Credential {
    pub fn is_complete(&self) -> bool {
        [
            &self.sessdata,
            &self.bili_jct,
            &self.buvid3,
            &self.dedeuserid,
            &self.ac_time_value,
        ]
        .iter()
        .all(|field| !field.is_empty())
    }

    /// 合并为单个 Cookie 请求头
    pub fn cookie_header(&self) -> String {
        format!(
            "SESSDATA={}; bili_jct={}; buvid3={}; DedeUserID={}; ac_time_value={}",
            self.sessdata, self.bili_jct, self.buvid3, self.dedeuserid, self.ac_time_value
        )
    }

    /// 询问服务端当前的 cookie 是否需要刷新
    pub async fn need_refresh(&self, client: &Client) -> Result<bool> {
        let body = api_json(client.request(
            Method::GET,
            "https://passport.bilibili.com/x/passport-login/web/cookie/info",
            Some(self),
        ))
        .await?;
        body["data"]["refresh"].as_bool().context("check refresh failed")
    }

    /// 刷新分三步：用 correspond path 换 refresh_csrf，用它换新的 cookie，最后用新 cookie 确认让旧的失效
    pub async fn refresh(&self, client: &Client) -> Result<Self> {
        let path = correspond_path(chrono::Local::now().timestamp_millis())?;
        let csrf = self.refresh_csrf(client, &path).await?;
        let rotated = self.rotate(client, &csrf).await?;
        self.confirm(client, &rotated).await?;
        Ok(rotated)
    }

    async fn refresh_csrf(&self, client: &Client, path: &str) -> Result<String> {
        let page = client
            .request(
                Method::GET,
                &format!("https://www.bilibili.com/correspond/1/{}", path),
                Some(self),
            )
            .header(header::COOKIE, "Domain=.bilibili.com")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let re = Regex::new(REFRESH_CSRF_PATTERN)?;
        re.captures(&page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_owned())
            .context("refresh_csrf not found in correspond page")
    }

    async fn rotate(&self, client: &Client, csrf: &str) -> Result<Credential> {
        let mut res = client
            .request(
                Method::POST,
                "https://passport.bilibili.com/x/passport-login/web/cookie/refresh",
                Some(self),
            )
            .header(header::COOKIE, "Domain=.bilibili.com")
            .form(&[
                ("csrf", self.bili_jct.as_str()),
                ("refresh_csrf", csrf),
                ("refresh_token", self.ac_time_value.as_str()),
                ("source", "main_web"),
            ])
            .send()
            .await?
            .error_for_status()?;
        // 新 cookie 在响应头里，需要在读取 body 之前取出
        let headers = std::mem::take(res.headers_mut());
        let body = res.json::<serde_json::Value>().await?.validate()?;
        let refresh_token = body["data"]["refresh_token"]
            .as_str()
            .context("refresh_token not found")?;
        let set_cookies = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok());
        self.rotated(set_cookies, refresh_token)
    }

    /// 由刷新接口下发的 set-cookie 组装新凭据，buvid3 不会变化
    fn rotated<'a>(&self, set_cookies: impl Iterator<Item = &'a str>, refresh_token: &str) -> Result<Credential> {
        let mut next = Credential {
            buvid3: self.buvid3.clone(),
            ac_time_value: refresh_token.to_owned(),
            ..Default::default()
        };
        for cookie in set_cookies.filter_map(|raw| Cookie::parse(raw).ok()) {
            let field = match cookie.name() {
                "SESSDATA" => &mut next.sessdata,
                "bili_jct" => &mut next.bili_jct,
                "DedeUserID" => &mut next.dedeuserid,
                _ => continue,
            };
            *field = cookie.value().to_owned();
        }
        ensure!(
            !next.sessdata.is_empty() && !next.bili_jct.is_empty() && !next.dedeuserid.is_empty(),
            "not all required cookies found"
        );
        Ok(next)
    }

    /// 确认请求携带新 cookie，refresh_token 使用旧的
    async fn confirm(&self, client: &Client, rotated: &Credential) -> Result<()> {
        api_json(
            client
                .request(
                    Method::POST,
                    "https://passport.bilibili.com/x/passport-login/web/confirm/refresh",
                    Some(rotated),
                )
                .form(&[
                    ("csrf", rotated.bili_jct.as_str()),
                    ("refresh_token", self.ac_time_value.as_str()),
                ]),
        )
        .await?;
        Ok(())
    }
}

/// 用公钥加密 `refresh_{毫秒时间戳}`，结果以十六进制拼进 url
fn correspond_path(timestamp_ms: i64) -> Result<String> {
    let key = RsaPublicKey::from_public_key_pem(CORRESPOND_KEY).context("invalid correspond public key")?;
    let plain = format!("refresh_{}", timestamp_ms);
    let encrypted = key
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), plain.as_bytes())
        .context("failed to encrypt correspond path")?;
    Ok(hex::encode(encrypted))
}
