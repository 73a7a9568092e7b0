//! 收藏夹中的条目，(favorite_id, bvid) 唯一

use sea_orm::entity::prelude::*;

use crate::{MediaKind, MediaStatus, StringVec};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "video")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub favorite_id: i32,
    pub upper_id: i64,
    pub bvid: String,
    pub name: String,
    pub category: MediaKind,
    pub intro: String,
    pub cover: String,
    pub ctime: DateTime,
    pub pubtime: DateTime,
    pub favtime: DateTime,
    pub status: MediaStatus,
    pub downloaded: bool,
    pub tags: Option<StringVec>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::favorite::Entity",
        from = "Column::FavoriteId",
        to = "super::favorite::Column::Id"
    )]
    Favorite,
    #[sea_orm(
        belongs_to = "super::upper::Entity",
        from = "Column::UpperId",
        to = "super::upper::Column::Mid"
    )]
    Upper,
    #[sea_orm(has_many = "super::page::Entity")]
    Page,
}

impl Related<super::favorite::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Favorite.def()
    }
}

impl Related<super::upper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Upper.def()
    }
}

impl Related<super::page::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Page.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
