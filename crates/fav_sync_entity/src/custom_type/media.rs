use sea_orm::entity::prelude::*;

/// 收藏条目的媒体类型，取值与收藏夹接口返回的 type 一致
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum MediaKind {
    #[sea_orm(num_value = 2)]
    Video,
    #[sea_orm(num_value = 12)]
    Audio,
    #[sea_orm(num_value = 21)]
    VideoCollection,
}

impl MediaKind {
    /// 未知类型返回 None，由调用方决定如何处理
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(Self::Video),
            12 => Some(Self::Audio),
            21 => Some(Self::VideoCollection),
            _ => None,
        }
    }
}

/// 条目（或分页）的可用状态
///
/// 只有 Normal 状态的条目会被尝试下载，Invisible 和 Deleted 由远端错误码判定，
/// 一旦进入就不会被程序自动重置。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum MediaStatus {
    #[default]
    #[sea_orm(num_value = 1)]
    Normal,
    #[sea_orm(num_value = 2)]
    Invisible,
    #[sea_orm(num_value = 3)]
    Deleted,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Invisible => "invisible",
            Self::Deleted => "deleted",
        }
    }
}
