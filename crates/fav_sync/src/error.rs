use std::process::ExitStatus;

use anyhow::Result;
use thiserror::Error;

/// ffmpeg 以非零状态退出，临时文件会被保留用于排查
#[derive(Error, Debug)]
#[error("ffmpeg exited with {status}: {stderr}")]
pub struct MuxError {
    pub status: ExitStatus,
    pub stderr: String,
}

/// 单个子任务的执行结果
#[derive(Debug)]
pub enum ExecutionStatus {
    /// 目标已存在，或当前条目不需要执行该子任务
    Skipped,
    Succeeded,
    Failed(anyhow::Error),
}

// 子任务内部用 ? 传播错误，汇总时再折叠为 Failed
impl From<Result<ExecutionStatus>> for ExecutionStatus {
    fn from(res: Result<ExecutionStatus>) -> Self {
        res.unwrap_or_else(ExecutionStatus::Failed)
    }
}
