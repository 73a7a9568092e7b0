use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::bilibili::danmaku::canvas::CanvasConfig;
use crate::bilibili::danmaku::{Dialogue, Motion};

struct TimePoint {
    t: f64,
}

impl std::fmt::Display for TimePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let centis = (self.t.max(0.0) * 100.0).round() as u64;
        let (hours, rest) = (centis / 360000, centis % 360000);
        let (minutes, rest) = (rest / 6000, rest % 6000);
        let (seconds, centis) = (rest / 100, rest % 100);
        write!(f, "{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
    }
}

impl std::fmt::Display for Motion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Motion::Scroll { from, to } => write!(f, "\\move({}, {}, {}, {})", from.0, from.1, to.0, to.1),
            Motion::Pinned { at } => write!(f, "\\pos({}, {})", at.0, at.1),
        }
    }
}

/// 流式写出 ASS 字幕：先写头部，再逐条写 Dialogue
pub struct AssWriter<W: AsyncWrite + Unpin> {
    f: BufWriter<W>,
    title: String,
    canvas_config: CanvasConfig,
}

impl<W: AsyncWrite + Unpin> AssWriter<W> {
    pub fn new(f: W, title: String, canvas_config: CanvasConfig) -> Self {
        AssWriter {
            f: BufWriter::new(f),
            title,
            canvas_config,
        }
    }

    pub async fn construct(f: W, title: String, canvas_config: CanvasConfig) -> Result<Self> {
        let mut res = Self::new(f, title, canvas_config);
        res.init().await?;
        Ok(res)
    }

    pub async fn init(&mut self) -> Result<()> {
        let option = &self.canvas_config.danmaku_option;
        let header = format!(
            "\
            [Script Info]\n\
            ; Script generated by fav-sync\n\
            Title: {title}\n\
            ScriptType: v4.00+\n\
            PlayResX: {width}\n\
            PlayResY: {height}\n\
            Aspect Ratio: {width}:{height}\n\
            Collisions: Normal\n\
            WrapStyle: 2\n\
            ScaledBorderAndShadow: yes\n\
            YCbCr Matrix: TV.601\n\
            \n\
            [V4+ Styles]\n\
            Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, \
            Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, \
            Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
            Style: Float,{font},{font_size},&H{a}FFFFFF,&H00FFFFFF,&H{a}000000,&H00000000,\
            {bold},0,0,0,100,100,0.00,0.00,1,{outline},0,7,0,0,0,1\n\
            Style: Bottom,{font},{font_size},&H{a}FFFFFF,&H00FFFFFF,&H{a}000000,&H00000000,\
            {bold},0,0,0,100,100,0.00,0.00,1,{outline},0,2,0,0,0,1\n\
            Style: Top,{font},{font_size},&H{a}FFFFFF,&H00FFFFFF,&H{a}000000,&H00000000,\
            {bold},0,0,0,100,100,0.00,0.00,1,{outline},0,8,0,0,0,1\n\
            \n\
            [Events]\n\
            Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
            title = self.title,
            width = self.canvas_config.width,
            height = self.canvas_config.height,
            font = option.font,
            font_size = option.font_size,
            a = format!("{:02X}", option.opacity),
            bold = if option.bold { 1 } else { 0 },
            outline = option.outline,
        );
        self.f.write_all(header.as_bytes()).await?;
        Ok(())
    }

    pub async fn write(&mut self, dialogue: Dialogue) -> Result<()> {
        let Dialogue {
            comment,
            duration,
            motion,
        } = dialogue;
        // ASS 的颜色是 BGR 顺序
        let (r, g, b) = comment.color;
        let line = format!(
            "Dialogue: 2,{start},{end},{style},,0,0,0,,{{{motion}\\c&H{b:02X}{g:02X}{r:02X}&}}{text}\n",
            start = TimePoint { t: comment.offset },
            end = TimePoint {
                t: comment.offset + duration
            },
            style = comment.placement.style_name(),
            text = escape_text(&comment.text),
        );
        self.f.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.f.flush().await?)
    }
}

/// 花括号会被解析为 override 标签，换行需要转成 \N
fn escape_text(text: &str) -> String {
    text.trim()
        .replace('{', "｛")
        .replace('}', "｝")
        .replace("\r\n", "\\N")
        .replace('\n', "\\N")
}
