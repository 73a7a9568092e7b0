use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

/// 同目录下的暂存文件名
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// 把已经完整写好的 staged 放到 target：先复制为同目录的 .part 再重命名，target 要么不存在要么完整
pub async fn install(staged: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(target);
    let res = async {
        fs::copy(staged, &part).await?;
        fs::rename(&part, target).await
    }
    .await;
    if let Err(e) = res {
        if let Err(cleanup) = fs::remove_file(&part).await {
            debug!("清理 {} 失败：{:#}", part.display(), cleanup);
        }
        return Err(e).with_context(|| format!("failed to install {}", target.display()));
    }
    Ok(())
}

pub async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content).await?;
    Ok(())
}
