//! 多 P 条目的分页，(video_id, pid) 唯一

use sea_orm::entity::prelude::*;

use crate::MediaStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "page")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub video_id: i32,
    pub cid: i64,
    pub pid: i32,
    pub name: String,
    pub image: Option<String>,
    pub duration: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub status: MediaStatus,
    pub downloaded: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::video::Entity",
        from = "Column::VideoId",
        to = "super::video::Column::Id"
    )]
    Video,
}

impl Related<super::video::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Video.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
