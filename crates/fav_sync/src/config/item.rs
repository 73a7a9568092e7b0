use serde::{Deserialize, Serialize};

/// 并发与限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentLimit {
    /// 同时处理的条目数，全局共享
    pub video: usize,
    pub rate_limit: Option<RateLimit>,
}

/// 每 duration 毫秒最多发出 limit 个请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: usize,
    pub duration: u64,
}

impl Default for ConcurrentLimit {
    fn default() -> Self {
        Self {
            video: 4,
            // 默认的限速配置，每 250ms 允许请求 4 次
            rate_limit: Some(RateLimit {
                limit: 4,
                duration: 250,
            }),
        }
    }
}

/// nfo 中使用的时间字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NFOTimeType {
    #[default]
    FavTime,
    PubTime,
}
