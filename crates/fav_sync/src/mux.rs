use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_tempfile::TempFile;
use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;

use crate::bilibili::BestStream;
use crate::downloader::AssetFetcher;
use crate::error::MuxError;
use crate::utils::file::install;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxMode {
    /// 直接复制流，不重新编码
    Copy,
    /// 交给 ffmpeg 自行选择编码转换容器
    Transcode,
}

/// 外部的封装工具，输入若干本地文件，输出一个可播放的文件
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(&self, inputs: &[&Path], output: &Path, mode: MuxMode) -> Result<()>;
}

pub struct FfmpegMuxer {
    ffmpeg_path: String,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn args(inputs: &[&Path], output: &Path, mode: MuxMode) -> Vec<String> {
        let mut args = Vec::with_capacity(inputs.len() * 2 + 6);
        for input in inputs {
            args.push("-i".to_owned());
            args.push(input.to_string_lossy().into_owned());
        }
        if mode == MuxMode::Copy {
            args.extend(["-c", "copy", "-strict", "unofficial"].map(String::from));
        }
        // 输出到无扩展名的临时文件，需要显式指定容器
        args.extend(["-f", "mp4", "-y"].map(String::from));
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, inputs: &[&Path], output: &Path, mode: MuxMode) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        let output = Command::new(&self.ffmpeg_path)
            .args(Self::args(inputs, output, mode))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffmpeg_path))?;
        if !output.status.success() {
            return Err(MuxError {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// 单个视频（或分页）使用的临时文件，路径由条目决定，不同条目之间不会冲突
#[derive(Debug, Clone)]
pub struct TempPaths {
    pub video: PathBuf,
    pub audio: PathBuf,
}

/// 下载流并封装为最终文件，负责临时文件的生命周期
pub struct MuxPipeline<'a> {
    fetcher: &'a dyn AssetFetcher,
    muxer: &'a dyn Muxer,
}

impl<'a> MuxPipeline<'a> {
    pub fn new(fetcher: &'a dyn AssetFetcher, muxer: &'a dyn Muxer) -> Self {
        Self { fetcher, muxer }
    }

    /// 调用方需保证 final_path 尚不存在；ffmpeg 失败时保留下载的临时文件，final_path 保持不存在
    pub async fn fetch_and_mux(&self, streams: &BestStream, temp: &TempPaths, final_path: &Path) -> Result<()> {
        match streams {
            BestStream::Mixed(stream) => {
                self.fetcher.fetch(stream.url(), &temp.video).await?;
                self.mux_into(&[temp.video.as_path()], MuxMode::Transcode, final_path)
                    .await?;
                remove_temp(&temp.video).await;
            }
            BestStream::VideoAudio {
                video,
                audio: Some(audio),
            } => {
                tokio::try_join!(
                    self.fetcher.fetch(video.url(), &temp.video),
                    self.fetcher.fetch(audio.url(), &temp.audio)
                )?;
                self.mux_into(
                    &[temp.video.as_path(), temp.audio.as_path()],
                    MuxMode::Copy,
                    final_path,
                )
                .await?;
                tokio::join!(remove_temp(&temp.video), remove_temp(&temp.audio));
            }
            BestStream::VideoAudio { video, audio: None } => {
                // 部分视频没有音轨，只需要把视频流复制进 mp4 容器
                self.fetcher.fetch(video.url(), &temp.video).await?;
                self.mux_into(&[temp.video.as_path()], MuxMode::Copy, final_path)
                    .await?;
                remove_temp(&temp.video).await;
            }
        }
        Ok(())
    }

    /// 先封装到临时文件，成功后再复制到同目录的 .part 文件并重命名，final_path 只会是完整文件
    async fn mux_into(&self, inputs: &[&Path], mode: MuxMode, final_path: &Path) -> Result<()> {
        let output = TempFile::new().await?;
        let res = self.mux_then_install(inputs, mode, output.file_path(), final_path).await;
        output.drop_async().await;
        res
    }

    async fn mux_then_install(&self, inputs: &[&Path], mode: MuxMode, output: &Path, final_path: &Path) -> Result<()> {
        self.muxer.mux(inputs, output, mode).await?;
        install(output, final_path).await
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("删除临时文件 {} 失败：{:#}", path.display(), e);
    }
}
