//! 解码后的单条弹幕，位置由画布决定

use anyhow::{Error, bail};

use crate::bilibili::danmaku::canvas::DanmakuOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Scroll,
    Top,
    Bottom,
}

impl Placement {
    /// 对应 ASS 头部中定义的样式名
    pub fn style_name(self) -> &'static str {
        match self {
            Placement::Scroll => "Float",
            Placement::Top => "Top",
            Placement::Bottom => "Bottom",
        }
    }
}

impl TryFrom<i32> for Placement {
    type Error = Error;

    fn try_from(mode: i32) -> Result<Self, Error> {
        Ok(match mode {
            // 逆向弹幕（6）很少见，同样从右向左滚动
            1..=3 | 6 => Placement::Scroll,
            4 => Placement::Bottom,
            5 => Placement::Top,
            _ => bail!("unsupported danmaku mode {}", mode),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    /// 在视频中出现的时间，单位秒
    pub offset: f64,
    pub text: String,
    pub placement: Placement,
    pub color: (u8, u8, u8),
}

impl Comment {
    /// 渲染宽度统一按画布字号估算，不使用弹幕自带的字号，ASCII 字符按 2/3 个全角计
    pub fn rendered_width(&self, option: &DanmakuOption) -> f64 {
        let thirds: u32 = self.text.chars().map(|c| if c.is_ascii() { 2 } else { 3 }).sum();
        f64::from(option.font_size * thirds / 3) * option.width_ratio
    }
}
