mod args;
mod item;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arc_swap::ArcSwapOption;
use clap::Parser;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub use crate::config::args::{Args, Command, RefreshTarget};
pub use crate::config::item::{ConcurrentLimit, NFOTimeType, RateLimit};
use crate::bilibili::{Credential, DanmakuOption, FilterOption};

pub static ARGS: Lazy<Args> = Lazy::new(Args::parse);

pub static CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    ARGS.config_dir.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fav-sync")
    })
});

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let config_path = CONFIG_DIR.join("config.toml");
    let config = Config::load(&config_path).unwrap_or_else(|err| {
        if err
            .downcast_ref::<std::io::Error>()
            .is_none_or(|e| e.kind() != std::io::ErrorKind::NotFound)
        {
            panic!("加载配置文件失败，错误为： {:#}", err);
        }
        warn!("配置文件不存在，使用默认配置...");
        Config::default_in(&CONFIG_DIR)
    });
    // 放到外面，确保新的配置项被保存
    info!("配置加载完毕，覆盖刷新原有配置");
    if let Err(e) = config.save(&config_path) {
        warn!("保存配置文件失败：{:#}", e);
    }
    config
});

#[derive(Serialize, Deserialize)]
pub struct Config {
    pub credential: ArcSwapOption<Credential>,
    #[serde(default)]
    pub filter_option: FilterOption,
    #[serde(default)]
    pub danmaku_option: DanmakuOption,
    /// 收藏夹 id 到保存路径的映射，toml 的键只能是字符串
    pub favorite_list: HashMap<String, PathBuf>,
    pub upper_path: PathBuf,
    pub interval: u64,
    #[serde(default)]
    pub nfo_time_type: NFOTimeType,
    #[serde(default)]
    pub concurrent_limit: ConcurrentLimit,
}

impl Config {
    pub fn default_in(config_dir: &Path) -> Self {
        Self {
            credential: ArcSwapOption::from(Some(Arc::new(Credential::default()))),
            filter_option: FilterOption::default(),
            danmaku_option: DanmakuOption::default(),
            favorite_list: HashMap::new(),
            upper_path: config_dir.join("upper_face"),
            interval: 1200,
            nfo_time_type: NFOTimeType::FavTime,
            concurrent_limit: ConcurrentLimit::default(),
        }
    }

    /// 简单的预检查，所有问题会被一次性列出
    pub fn check(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.favorite_list.is_empty() {
            errors.push("未设置需监听的收藏夹，程序空转没有意义".to_owned());
        }
        for (fid, path) in &self.favorite_list {
            if fid.parse::<i64>().is_err() {
                errors.push(format!("收藏夹 id 应为整数，检测到: {}", fid));
            }
            if !path.is_absolute() {
                errors.push(format!("收藏夹保存的路径应为绝对路径，检测到: {}", path.display()));
            }
        }
        if !self.upper_path.is_absolute() {
            errors.push("up 主头像保存的路径应为绝对路径".to_owned());
        }
        if self.concurrent_limit.video == 0 {
            errors.push("video 并发数必须大于 0".to_owned());
        }
        if self
            .concurrent_limit
            .rate_limit
            .as_ref()
            .is_some_and(|r| r.limit == 0 || r.duration == 0)
        {
            errors.push("rate_limit 的 limit 和 duration 必须大于 0".to_owned());
        }
        match self.credential.load().as_deref() {
            Some(credential) if credential.is_complete() => {}
            Some(_) => errors.push("Credential 信息不完整，请确保填写完整".to_owned()),
            None => errors.push("未设置 Credential 信息".to_owned()),
        }
        if !errors.is_empty() {
            bail!("配置文件不合法：\n{}", errors.join("\n"));
        }
        Ok(())
    }

    /// 解析后的收藏夹列表，按 id 排序保证每轮处理顺序一致
    pub fn favorite_roots(&self) -> Result<Vec<(i64, PathBuf)>> {
        let mut roots = self
            .favorite_list
            .iter()
            .map(|(fid, path)| {
                fid.parse::<i64>()
                    .map(|fid| (fid, path.clone()))
                    .with_context(|| format!("invalid favorite id: {}", fid))
            })
            .collect::<Result<Vec<_>>>()?;
        roots.sort_by_key(|(fid, _)| *fid);
        Ok(roots)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)?;
        toml::from_str(&config_content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 替换内存中的凭据并立即写回配置文件
    pub fn update_credential(&self, credential: Credential, path: &Path) -> Result<()> {
        self.credential.store(Some(Arc::new(credential)));
        self.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(dir: &Path) -> Config {
        let config = Config::default_in(dir);
        config.credential.store(Some(Arc::new(Credential {
            sessdata: "sess".to_string(),
            bili_jct: "jct".to_string(),
            buvid3: "buvid3".to_string(),
            dedeuserid: "1".to_string(),
            ac_time_value: "ac".to_string(),
        })));
        config
    }

    #[test]
    fn test_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        // 没有收藏夹
        assert!(config.check().is_err());
        config.favorite_list.insert("123".to_string(), dir.path().join("fav"));
        assert!(config.check().is_ok());
        config.favorite_list.insert("abc".to_string(), PathBuf::from("relative"));
        let err = config.check().unwrap_err().to_string();
        assert!(err.contains("abc"));
        assert!(err.contains("relative"));
        config.favorite_list.remove("abc");
        config.credential.store(Some(Arc::new(Credential::default())));
        assert!(config.check().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = valid_config(dir.path());
        config.favorite_list.insert("20".to_string(), dir.path().join("b"));
        config.favorite_list.insert("3".to_string(), dir.path().join("a"));
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.interval, 1200);
        assert_eq!(loaded.concurrent_limit.video, 4);
        assert_eq!(
            loaded.favorite_roots().unwrap(),
            vec![(3, dir.path().join("a")), (20, dir.path().join("b"))]
        );
        loaded
            .update_credential(
                Credential {
                    sessdata: "new".to_string(),
                    ..Default::default()
                },
                &path,
            )
            .unwrap();
        let reloaded = Config::load(&path).unwrap();
        assert_eq!(
            reloaded.credential.load().as_deref().map(|c| c.sessdata.as_str()),
            Some("new")
        );
    }

    #[test]
    fn test_load_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
interval = 600
upper_path = "/data/upper"

[credential]
sessdata = "s"
bili_jct = "b"
buvid3 = "u"
dedeuserid = "d"
ac_time_value = "a"

[favorite_list]
"42" = "/data/fav"
"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.interval, 600);
        assert_eq!(config.nfo_time_type, NFOTimeType::FavTime);
        assert_eq!(config.danmaku_option, DanmakuOption::default());
        assert!(config.check().is_ok());
    }
}
