use fav_sync_entity::MediaStatus;

use crate::bilibili::BiliError;

/// 稿件不可见（如仅 up 主自己可见、审核中）
pub const CODE_INVISIBLE: i64 = 62002;
/// 稿件已被删除
pub const CODE_DELETED: i64 = -404;

/// 一次下载尝试之后条目应处于的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    pub status: MediaStatus,
    pub downloaded: bool,
}

impl EntryState {
    pub fn new(status: MediaStatus, downloaded: bool) -> Self {
        Self { status, downloaded }
    }
}

/// 从错误链中找到远端错误码并映射到终止状态，无法识别的错误返回 None，视为临时错误
pub fn classify(err: &anyhow::Error) -> Option<MediaStatus> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<BiliError>())
        .find_map(|e| match e.code() {
            Some(CODE_INVISIBLE) => Some(MediaStatus::Invisible),
            Some(CODE_DELETED) => Some(MediaStatus::Deleted),
            _ => None,
        })
}

/// 状态转移：成功则标记为已下载；可识别的错误码进入终止状态；其余错误保持原状等待下轮重试。
/// 已经处于终止状态的条目不会被重置。
pub fn transition<T>(current: EntryState, result: &anyhow::Result<T>) -> EntryState {
    if current.status != MediaStatus::Normal {
        return current;
    }
    match result {
        Ok(_) => EntryState::new(MediaStatus::Normal, true),
        Err(e) => match classify(e) {
            Some(status) => EntryState::new(status, false),
            None => current,
        },
    }
}
