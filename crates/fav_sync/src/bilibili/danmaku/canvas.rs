//! 决定每条弹幕画在哪里

use float_ord::FloatOrd;
use serde::{Deserialize, Serialize};

use crate::bilibili::PageInfo;
use crate::bilibili::danmaku::comment::{Comment, Placement};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DanmakuOption {
    /// 滚动弹幕在屏幕上停留的时间
    pub duration: f64,
    /// 顶部、底部弹幕在屏幕上停留的时间
    pub static_duration: f64,
    pub font: String,
    pub font_size: u32,
    pub width_ratio: f64,
    /// 两条弹幕之间最小的水平距离
    pub horizontal_gap: f64,
    /// 每一行弹幕占用的高度
    pub lane_size: u32,
    /// 屏幕上滚动弹幕最多高度百分比
    pub float_percentage: f64,
    /// 屏幕上顶部、底部弹幕各自最多高度百分比
    pub bottom_percentage: f64,
    /// 透明度（0-255）
    pub opacity: u8,
    pub bold: bool,
    /// 描边
    pub outline: f64,
    /// 时间轴偏移
    pub time_offset: f64,
    /// 拿不到分页尺寸时使用的画布宽高
    pub default_width: u32,
    pub default_height: u32,
}

impl Default for DanmakuOption {
    fn default() -> Self {
        Self {
            duration: 15.0,
            static_duration: 5.0,
            font: "黑体".to_string(),
            font_size: 25,
            width_ratio: 1.2,
            horizontal_gap: 20.0,
            lane_size: 32,
            float_percentage: 0.5,
            bottom_percentage: 0.3,
            opacity: (0.3 * 255.0) as u8,
            bold: true,
            outline: 0.8,
            time_offset: 0.0,
            default_width: 1280,
            default_height: 720,
        }
    }
}

#[derive(Clone)]
pub struct CanvasConfig {
    pub width: u64,
    pub height: u64,
    pub danmaku_option: DanmakuOption,
}

impl CanvasConfig {
    pub fn new(danmaku_option: &DanmakuOption, page: &PageInfo) -> Self {
        let (width, height) = Self::dimension(danmaku_option, page);
        Self {
            width,
            height,
            danmaku_option: danmaku_option.clone(),
        }
    }

    /// 画布高度固定为 720，宽度按分页的宽高比缩放，字号因此不随分辨率变化
    fn dimension(danmaku_option: &DanmakuOption, page: &PageInfo) -> (u64, u64) {
        let (width, height) = match &page.dimension {
            Some(d) if d.width > 0 && d.height > 0 => {
                if d.rotate == 0 {
                    (d.width, d.height)
                } else {
                    (d.height, d.width)
                }
            }
            _ => (danmaku_option.default_width, danmaku_option.default_height.max(1)),
        };
        ((720.0 / height as f64 * width as f64) as u64, 720)
    }

    fn rows(&self, percentage: f64) -> usize {
        (percentage * self.height as f64 / self.danmaku_option.lane_size.max(1) as f64) as usize
    }

    pub fn canvas(self) -> Canvas {
        let scroll_rows = self.rows(self.danmaku_option.float_percentage);
        let static_rows = self.rows(self.danmaku_option.bottom_percentage);
        Canvas {
            config: self,
            scroll_tracks: vec![None; scroll_rows],
            top_free_at: vec![f64::MIN; static_rows],
            bottom_free_at: vec![f64::MIN; static_rows],
        }
    }
}

/// 弹幕在画面上的运动方式，坐标为 ASS 画布上的像素
#[derive(Debug, PartialEq)]
pub enum Motion {
    Scroll { from: (i32, i32), to: (i32, i32) },
    Pinned { at: (i32, i32) },
}

/// 已经确定位置的弹幕，从 comment.offset 开始显示 duration 秒
#[derive(Debug)]
pub struct Dialogue {
    pub comment: Comment,
    pub duration: f64,
    pub motion: Motion,
}

/// 一行滚动弹幕，只需要记住最后发射的那一条
#[derive(Debug, Clone, Copy)]
struct Track {
    launched_at: f64,
    width: f64,
}

impl Track {
    /// 在 at 时刻发射宽度为 width 的弹幕前还需要等待的秒数
    ///
    /// 弹幕在 duration 内走完 screen + 自身宽度，越长的弹幕越快
    fn wait_before(&self, at: f64, width: f64, screen: f64, option: &DanmakuOption) -> f64 {
        let (span, gap) = (option.duration, option.horizontal_gap);
        let speed = |w: f64| (screen + w) / span;
        // 上一条的尾部离开右边缘，并留出 gap
        let mut earliest = self.launched_at + (self.width + gap) / speed(self.width);
        if width > self.width {
            // 上一条在 launched_at + span 离开左边缘，此前新弹幕的头部不能追到距离它 gap 以内
            earliest = earliest.max(self.launched_at + span - (screen - gap) / speed(width));
        }
        (earliest - at).max(0.0)
    }
}

pub struct Canvas {
    pub config: CanvasConfig,
    scroll_tracks: Vec<Option<Track>>,
    /// 顶部、底部弹幕每一行重新空闲的时间点
    top_free_at: Vec<f64>,
    bottom_free_at: Vec<f64>,
}

impl Canvas {
    /// 放不下的弹幕返回 None
    pub fn draw(&mut self, mut comment: Comment) -> Option<Dialogue> {
        comment.offset += self.config.danmaku_option.time_offset;
        if comment.offset < 0.0 {
            return None;
        }
        match comment.placement {
            Placement::Scroll => self.draw_scroll(comment),
            Placement::Top | Placement::Bottom => self.draw_pinned(comment),
        }
    }

    fn draw_scroll(&mut self, mut comment: Comment) -> Option<Dialogue> {
        let option = &self.config.danmaku_option;
        let width = comment.rendered_width(option);
        let screen = self.config.width as f64;
        let waits = self
            .scroll_tracks
            .iter()
            .map(|track| match track {
                None => 0.0,
                Some(track) => track.wait_before(comment.offset, width, screen, option),
            })
            .collect::<Vec<_>>();
        // 等待时间相同时取最上面的一行
        let (row, wait) = waits.into_iter().enumerate().min_by_key(|(_, wait)| FloatOrd(*wait))?;
        if wait > 0.0 {
            // 所有行都被占用时，最多推迟 1 秒
            if wait >= 1.0 {
                debug!("丢弃弹幕：{}", comment.text);
                return None;
            }
            debug!("延迟弹幕 {} 秒", wait);
            comment.offset += wait + 0.01;
        }
        Some(self.launch(comment, width, row))
    }

    fn launch(&mut self, comment: Comment, width: f64, row: usize) -> Dialogue {
        self.scroll_tracks[row] = Some(Track {
            launched_at: comment.offset,
            width,
        });
        let y = row as i32 * self.config.danmaku_option.lane_size as i32;
        Dialogue {
            comment,
            duration: self.config.danmaku_option.duration,
            motion: Motion::Scroll {
                from: (self.config.width as i32, y),
                to: (-(width as i32), y),
            },
        }
    }

    /// 顶部、底部弹幕居中不动，取第一个已经空闲的行
    fn draw_pinned(&mut self, comment: Comment) -> Option<Dialogue> {
        let duration = self.config.danmaku_option.static_duration;
        let lane_size = self.config.danmaku_option.lane_size as i32;
        let top = comment.placement == Placement::Top;
        let rows = if top {
            &mut self.top_free_at
        } else {
            &mut self.bottom_free_at
        };
        let Some(row) = rows.iter().position(|free_at| *free_at <= comment.offset) else {
            debug!("丢弃弹幕：{}", comment.text);
            return None;
        };
        rows[row] = comment.offset + duration;
        let y = if top {
            row as i32 * lane_size
        } else {
            self.config.height as i32 - row as i32 * lane_size
        };
        Some(Dialogue {
            comment,
            duration,
            motion: Motion::Pinned {
                at: (self.config.width as i32 / 2, y),
            },
        })
    }
}
