//! 弹幕分段接口返回的 protobuf 消息

use anyhow::Result;
use prost::Message;

use crate::bilibili::danmaku::comment::{Comment, Placement};

/// 只声明渲染需要的字段，其余字段解码时会被跳过
#[derive(Clone, Message)]
pub struct DanmakuElem {
    /// 出现时间，单位毫秒
    #[prost(int32, tag = "2")]
    pub progress: i32,
    /// 1-3 与 6 滚动，4 底部，5 顶部，其余为高级弹幕
    #[prost(int32, tag = "3")]
    pub mode: i32,
    /// 0xRRGGBB
    #[prost(uint32, tag = "5")]
    pub color: u32,
    #[prost(string, tag = "7")]
    pub content: String,
}

#[derive(Clone, Message)]
pub struct DmSegMobileReply {
    #[prost(message, repeated, tag = "1")]
    pub elems: Vec<DanmakuElem>,
}

impl TryFrom<DanmakuElem> for Comment {
    type Error = anyhow::Error;

    /// 高级弹幕、代码弹幕等无法渲染为普通字幕的类型会返回 Err
    fn try_from(elem: DanmakuElem) -> Result<Self> {
        let [_, r, g, b] = elem.color.to_be_bytes();
        Ok(Self {
            offset: f64::from(elem.progress) / 1000.0,
            text: elem.content,
            placement: Placement::try_from(elem.mode)?,
            color: (r, g, b),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_segment() {
        let reply = DmSegMobileReply {
            elems: vec![
                DanmakuElem {
                    progress: 1500,
                    mode: 1,
                    color: 0xFF8000,
                    content: "前方高能".to_string(),
                    ..Default::default()
                },
                DanmakuElem {
                    progress: 2000,
                    mode: 7,
                    content: "[\"advanced\"]".to_string(),
                    ..Default::default()
                },
            ],
        };
        let decoded = DmSegMobileReply::decode(reply.encode_to_vec().as_slice()).unwrap();
        let comments: Vec<Comment> = decoded.elems.into_iter().filter_map(|e| e.try_into().ok()).collect();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].offset, 1.5);
        assert_eq!(comments[0].color, (0xFF, 0x80, 0x00));
        assert_eq!(comments[0].placement, Placement::Scroll);
    }
}
