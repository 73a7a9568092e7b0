use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use fav_sync_entity::video;
use parking_lot::RwLock;

/// 条目中的某类文件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Video,
    Poster,
    Nfo,
    Subtitle,
    TempVideo,
    TempAudio,
}

/// 文件归属的层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// 单 P 条目，所有文件平铺在收藏夹目录下
    Single,
    /// 多 P 条目本身，对应剧集目录下的 poster 与 tvshow.nfo
    Show,
    /// 多 P 条目的第 pid 个分页
    Episode(i32),
}

/// 根据收藏夹、条目与文件类型计算文件路径
#[derive(Debug)]
pub struct PathResolver {
    roots: RwLock<HashMap<i32, PathBuf>>,
    upper_path: PathBuf,
}

impl PathResolver {
    /// roots 的键是数据库中收藏夹的 id
    pub fn new(roots: HashMap<i32, PathBuf>, upper_path: PathBuf) -> Self {
        Self {
            roots: RwLock::new(roots),
            upper_path,
        }
    }

    /// 收藏夹首次写入数据库后登记其保存路径
    pub fn register(&self, favorite_id: i32, root: PathBuf) {
        self.roots.write().insert(favorite_id, root);
    }

    pub fn root(&self, entry: &video::Model) -> Result<PathBuf> {
        self.roots
            .read()
            .get(&entry.favorite_id)
            .cloned()
            .with_context(|| format!("no root path for favorite {}", entry.favorite_id))
    }

    pub fn resolve(&self, entry: &video::Model, part: Part, kind: AssetKind) -> Result<PathBuf> {
        let root = self.root(entry)?;
        let bvid = entry.bvid.as_str();
        let path = match part {
            Part::Single => match kind {
                AssetKind::Video => root.join(format!("{bvid}.mp4")),
                AssetKind::Poster => root.join(format!("{bvid}-poster.jpg")),
                AssetKind::Nfo => root.join(format!("{bvid}.nfo")),
                AssetKind::Subtitle => root.join(format!("{bvid}.zh-CN.default.ass")),
                AssetKind::TempVideo => root.join(format!("tmp_{bvid}_video")),
                AssetKind::TempAudio => root.join(format!("tmp_{bvid}_audio")),
            },
            Part::Show => match kind {
                AssetKind::Poster => root.join(bvid).join("poster.jpg"),
                AssetKind::Nfo => root.join(bvid).join("tvshow.nfo"),
                _ => anyhow::bail!("{:?} is not available for a multi-part entry itself", kind),
            },
            Part::Episode(pid) => {
                let season = root.join(bvid).join("Season 1");
                let stem = format!("{bvid} - S01E{pid:02}");
                match kind {
                    AssetKind::Video => season.join(format!("{stem}.mp4")),
                    AssetKind::Poster => season.join(format!("{stem}-thumb.jpg")),
                    AssetKind::Nfo => season.join(format!("{stem}.nfo")),
                    AssetKind::Subtitle => season.join(format!("{stem}.zh-CN.default.ass")),
                    AssetKind::TempVideo => root.join(format!("tmp_{bvid}_{pid}_video")),
                    AssetKind::TempAudio => root.join(format!("tmp_{bvid}_{pid}_audio")),
                }
            }
        };
        Ok(path)
    }

    /// up 主头像，按 mid 首字符分桶，兼容媒体服务器的 people 目录结构
    pub fn upper_face(&self, mid: i64) -> PathBuf {
        self.upper_dir(mid).join("folder.jpg")
    }

    pub fn upper_nfo(&self, mid: i64) -> PathBuf {
        self.upper_dir(mid).join("person.nfo")
    }

    fn upper_dir(&self, mid: i64) -> PathBuf {
        let mid = mid.to_string();
        let bucket = mid.chars().next().map(String::from).unwrap_or_default();
        self.upper_path.join(bucket).join(mid)
    }
}
