use std::path::Path;

use anyhow::Result;
use fav_sync_migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

fn database_url(config_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", config_dir.join("data.sqlite").to_string_lossy())
}

pub async fn database_connection(config_dir: &Path) -> Result<DatabaseConnection> {
    let mut option = ConnectOptions::new(database_url(config_dir));
    option
        .max_connections(16)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(90))
        .sqlx_logging(false);
    Ok(Database::connect(option).await?)
}

pub async fn migrate_database(config_dir: &Path) -> Result<()> {
    // 迁移使用单独构造的连接，多连接的连接池会导致迁移顺序问题
    let connection = Database::connect(database_url(config_dir)).await?;
    Migrator::up(&connection, None).await?;
    connection.close().await?;
    Ok(())
}

/// 测试使用的内存数据库，只能有一个连接，否则每个连接看到的都是不同的数据库
#[cfg(test)]
pub async fn setup_test_database() -> Result<DatabaseConnection> {
    let mut option = ConnectOptions::new("sqlite::memory:");
    option.max_connections(1).min_connections(1).sqlx_logging(false);
    let connection = Database::connect(option).await?;
    Migrator::up(&connection, None).await?;
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use fav_sync_entity::*;
    use sea_orm::EntityTrait;

    use super::*;

    #[tokio::test]
    async fn test_migrate_memory_database() {
        let connection = setup_test_database().await.unwrap();
        assert!(favorite::Entity::find().all(&connection).await.unwrap().is_empty());
        assert!(video::Entity::find().all(&connection).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migrate_file_database() {
        let dir = tempfile::tempdir().unwrap();
        migrate_database(dir.path()).await.unwrap();
        // 重复迁移应当是无害的
        migrate_database(dir.path()).await.unwrap();
        let connection = database_connection(dir.path()).await.unwrap();
        assert!(upper::Entity::find().all(&connection).await.unwrap().is_empty());
        connection.close().await.unwrap();
        assert!(dir.path().join("data.sqlite").exists());
    }
}
