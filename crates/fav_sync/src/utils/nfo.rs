use std::io;

use anyhow::Result;
use chrono::NaiveDateTime;
use fav_sync_entity::{page, upper, video};
use quick_xml::events::{BytesCData, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use crate::config::NFOTimeType;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>
"#;

/// 媒体服务器识别的元数据文档，每种文档只携带自己需要的字段
#[allow(clippy::upper_case_acronyms)]
pub enum NFO<'a> {
    /// 单 P 条目
    Movie(Show<'a>),
    /// 多 P 条目
    TVShow(Show<'a>),
    Episode(Episode<'a>),
    Upper(Person<'a>),
}

pub struct Show<'a> {
    pub name: &'a str,
    pub intro: &'a str,
    pub bvid: &'a str,
    pub upper_id: i64,
    pub upper_name: &'a str,
    pub aired: NaiveDateTime,
    pub tags: Vec<String>,
}

pub struct Episode<'a> {
    pub name: &'a str,
    pub pid: i32,
}

pub struct Person<'a> {
    pub mid: i64,
    pub name: &'a str,
    pub date_added: NaiveDateTime,
}

enum Body {
    Empty,
    Text(String),
    CData(String),
    Children(Vec<Element>),
}

struct Element {
    tag: &'static str,
    attribute: Option<(&'static str, &'static str)>,
    body: Body,
}

impl Element {
    fn new(tag: &'static str, body: Body) -> Self {
        Self {
            tag,
            attribute: None,
            body,
        }
    }

    fn empty(tag: &'static str) -> Self {
        Self::new(tag, Body::Empty)
    }

    fn text(tag: &'static str, text: impl Into<String>) -> Self {
        Self::new(tag, Body::Text(text.into()))
    }

    fn write(self, writer: &mut Writer<&mut Vec<u8>>) -> io::Result<()> {
        let mut start = BytesStart::new(self.tag);
        if let Some(attribute) = self.attribute {
            start.push_attribute(attribute);
        }
        match self.body {
            Body::Empty => return writer.write_event(Event::Empty(start)),
            Body::Text(text) => {
                writer.write_event(Event::Start(start.borrow()))?;
                writer.write_event(Event::Text(BytesText::new(&text)))?;
            }
            Body::CData(text) => {
                writer.write_event(Event::Start(start.borrow()))?;
                writer.write_event(Event::CData(BytesCData::new(text)))?;
            }
            Body::Children(children) => {
                writer.write_event(Event::Start(start.borrow()))?;
                for child in children {
                    child.write(writer)?;
                }
            }
        }
        writer.write_event(Event::End(start.to_end()))
    }
}

impl NFO<'_> {
    pub fn to_xml(self) -> Result<String> {
        let mut buffer = XML_HEADER.as_bytes().to_vec();
        self.into_element().write(&mut Writer::new_with_indent(&mut buffer, b' ', 4))?;
        Ok(String::from_utf8(buffer)?)
    }

    fn into_element(self) -> Element {
        let (root, children) = match self {
            NFO::Movie(show) => ("movie", show.elements()),
            NFO::TVShow(show) => ("tvshow", show.elements()),
            NFO::Episode(episode) => (
                "episodedetails",
                vec![
                    Element::empty("plot"),
                    Element::empty("outline"),
                    Element::text("title", episode.name),
                    // 所有分页都归入第一季
                    Element::text("season", "1"),
                    Element::text("episode", episode.pid.to_string()),
                ],
            ),
            NFO::Upper(person) => (
                "person",
                vec![
                    Element::empty("plot"),
                    Element::empty("outline"),
                    Element::text("lockdata", "false"),
                    Element::text("dateadded", person.date_added.format("%Y-%m-%d %H:%M:%S").to_string()),
                    Element::text("title", person.mid.to_string()),
                    Element::text("sorttitle", person.name),
                ],
            ),
        };
        Element::new(root, Body::Children(children))
    }
}

impl<'a> Show<'a> {
    pub fn new(entry: &'a video::Model, upper_name: &'a str, time_type: NFOTimeType) -> Self {
        Self {
            name: &entry.name,
            intro: &entry.intro,
            bvid: &entry.bvid,
            upper_id: entry.upper_id,
            upper_name,
            aired: match time_type {
                NFOTimeType::FavTime => entry.favtime,
                NFOTimeType::PubTime => entry.pubtime,
            },
            tags: entry.tags.clone().map(Vec::from).unwrap_or_default(),
        }
    }

    fn elements(self) -> Vec<Element> {
        let plot = format!(
            r#"原始视频：<a href="https://www.bilibili.com/video/{0}/">{0}</a><br/><br/>{1}"#,
            self.bvid, self.intro
        );
        let mut elements = vec![
            Element::new("plot", Body::CData(plot)),
            Element::empty("outline"),
            Element::text("title", self.name),
            Element::new(
                "actor",
                Body::Children(vec![
                    Element::text("name", self.upper_id.to_string()),
                    Element::text("role", self.upper_name),
                ]),
            ),
            Element::text("year", self.aired.format("%Y").to_string()),
        ];
        elements.extend(self.tags.into_iter().map(|tag| Element::text("genre", tag)));
        elements.push(Element {
            attribute: Some(("type", "bilibili")),
            ..Element::text("uniqueid", self.bvid)
        });
        elements.push(Element::text("aired", self.aired.format("%Y-%m-%d").to_string()));
        elements
    }
}

impl<'a> From<&'a page::Model> for Episode<'a> {
    fn from(page: &'a page::Model) -> Self {
        Self {
            name: &page.name,
            pid: page.pid,
        }
    }
}

impl<'a> From<&'a upper::Model> for Person<'a> {
    fn from(upper: &'a upper::Model) -> Self {
        Self {
            mid: upper.mid,
            name: &upper.name,
            date_added: upper.created_at,
        }
    }
}
