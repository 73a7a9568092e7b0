use anyhow::Result;

use crate::bilibili::PageInfo;
use crate::bilibili::danmaku::canvas::{CanvasConfig, DanmakuOption};
use crate::bilibili::danmaku::{AssWriter, Comment};

/// 持有单个分页的全部弹幕，按渲染参数输出 ASS 字幕
pub struct DanmakuWriter {
    page: PageInfo,
    comments: Vec<Comment>,
}

impl DanmakuWriter {
    pub fn new(page: PageInfo, comments: Vec<Comment>) -> Self {
        DanmakuWriter { page, comments }
    }

    pub async fn render(self, option: &DanmakuOption) -> Result<Vec<u8>> {
        let canvas_config = CanvasConfig::new(option, &self.page);
        let mut buffer = Vec::new();
        let mut writer = AssWriter::construct(&mut buffer, self.page.name.clone(), canvas_config.clone()).await?;
        let mut canvas = canvas_config.canvas();
        for comment in self.comments {
            if let Some(dialogue) = canvas.draw(comment) {
                writer.write(dialogue).await?;
            }
        }
        writer.flush().await?;
        drop(writer);
        Ok(buffer)
    }
}
