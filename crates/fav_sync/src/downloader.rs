use std::path::Path;

use anyhow::{Context, Result, ensure};
use async_tempfile::TempFile;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Method, Response, header};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::bilibili::Client;
use crate::utils::file::install;

/// 将远端资源完整保存到本地路径，不包含任何业务逻辑
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str, path: &Path) -> Result<()>;
}

/// 资源链接本身不校验 cookie，但缺少默认请求头会返回 403，所以复用接口客户端
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 把响应体写入 staged，服务端声明了长度时要求完全一致
    async fn download_to(&self, url: &str, staged: &mut TempFile) -> Result<()> {
        let resp = self
            .client
            .request(Method::GET, url, None)
            .send()
            .await?
            .error_for_status()?;
        let declared = declared_length(&resp);
        let mut body = StreamReader::new(resp.bytes_stream().map_err(std::io::Error::other));
        let written = tokio::io::copy(&mut body, staged).await?;
        staged.flush().await?;
        if let Some(declared) = declared {
            ensure!(written == declared, "incomplete body: {} of {} bytes", written, declared);
        }
        Ok(())
    }
}

#[async_trait]
impl AssetFetcher for Downloader {
    async fn fetch(&self, url: &str, path: &Path) -> Result<()> {
        let mut staged = TempFile::new().await?;
        let res = match self.download_to(url, &mut staged).await {
            Ok(()) => install(staged.file_path(), path).await,
            Err(e) => Err(e),
        };
        // 在 spawn_blocking 中删除，不阻塞当前的 worker
        staged.drop_async().await;
        res.with_context(|| format!("failed to download {}", url))
    }
}

/// Response::content_length 是 body 的大小提示，不一定等于响应头
fn declared_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
