use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [favorite_table(), upper_table(), video_table(), page_table()] {
            manager.create_table(table).await?;
        }
        for index in indexes() {
            manager.create_index(index).await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 与创建顺序相反
        for table in [
            Page::Table.into_iden(),
            Video::Table.into_iden(),
            Upper::Table.into_iden(),
            Favorite::Table.into_iden(),
        ] {
            manager.drop_table(Table::drop().table(table).to_owned()).await?;
        }
        Ok(())
    }
}

fn created_at<T: IntoIden>(col: T) -> ColumnDef {
    timestamp(col).default(Expr::current_timestamp()).take()
}

fn favorite_table() -> TableCreateStatement {
    Table::create()
        .table(Favorite::Table)
        .if_not_exists()
        .col(pk_auto(Favorite::Id))
        .col(big_integer_uniq(Favorite::FId))
        .col(string(Favorite::Name))
        .col(string(Favorite::Path))
        .col(created_at(Favorite::CreatedAt))
        .to_owned()
}

fn upper_table() -> TableCreateStatement {
    Table::create()
        .table(Upper::Table)
        .if_not_exists()
        .col(big_integer(Upper::Mid).primary_key())
        .col(string(Upper::Name))
        .col(text(Upper::Face))
        .col(created_at(Upper::CreatedAt))
        .to_owned()
}

fn video_table() -> TableCreateStatement {
    Table::create()
        .table(Video::Table)
        .if_not_exists()
        .col(pk_auto(Video::Id))
        .col(integer(Video::FavoriteId))
        .col(big_integer(Video::UpperId))
        .col(string(Video::Bvid))
        .col(string(Video::Name))
        .col(integer(Video::Category))
        .col(text(Video::Intro))
        .col(text(Video::Cover))
        .col(timestamp(Video::Ctime))
        .col(timestamp(Video::Pubtime))
        .col(timestamp(Video::Favtime))
        // 1 对应 MediaStatus::Normal
        .col(integer(Video::Status).default(1))
        .col(boolean(Video::Downloaded).default(false))
        .col(json_binary_null(Video::Tags))
        .col(created_at(Video::CreatedAt))
        .to_owned()
}

fn page_table() -> TableCreateStatement {
    Table::create()
        .table(Page::Table)
        .if_not_exists()
        .col(pk_auto(Page::Id))
        .col(integer(Page::VideoId))
        .col(big_integer(Page::Cid))
        .col(integer(Page::Pid))
        .col(string(Page::Name))
        .col(text_null(Page::Image))
        .col(unsigned(Page::Duration))
        .col(unsigned_null(Page::Width))
        .col(unsigned_null(Page::Height))
        .col(integer(Page::Status).default(1))
        .col(boolean(Page::Downloaded).default(false))
        .to_owned()
}

fn indexes() -> [IndexCreateStatement; 3] {
    [
        // 前两个唯一索引同时是 upsert 的冲突目标
        Index::create()
            .table(Video::Table)
            .name("idx_video_favorite_id_bvid")
            .col(Video::FavoriteId)
            .col(Video::Bvid)
            .unique()
            .to_owned(),
        Index::create()
            .table(Page::Table)
            .name("idx_page_video_id_pid")
            .col(Page::VideoId)
            .col(Page::Pid)
            .unique()
            .to_owned(),
        Index::create()
            .table(Video::Table)
            .name("idx_video_pending")
            .col(Video::FavoriteId)
            .col(Video::Category)
            .col(Video::Status)
            .col(Video::Downloaded)
            .to_owned(),
    ]
}

#[derive(DeriveIden)]
enum Favorite {
    Table,
    Id,
    FId,
    Name,
    Path,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Upper {
    Table,
    Mid,
    Name,
    Face,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Video {
    Table,
    Id,
    FavoriteId,
    UpperId,
    Bvid,
    Name,
    Category,
    Intro,
    Cover,
    Ctime,
    Pubtime,
    Favtime,
    Status,
    Downloaded,
    Tags,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Page {
    Table,
    Id,
    VideoId,
    Cid,
    Pid,
    Name,
    Image,
    Duration,
    Width,
    Height,
    Status,
    Downloaded,
}
