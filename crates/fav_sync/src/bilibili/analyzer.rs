use std::cmp::Ordering;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bilibili::error::BiliError;

/// 视频画质，取值为接口中的 qn
#[derive(Debug, Clone, Copy, strum::FromRepr, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VideoQuality {
    Quality360p = 16,
    Quality480p = 32,
    Quality720p = 64,
    Quality1080p = 80,
    Quality1080pPLUS = 112,
    Quality1080p60 = 116,
    Quality4k = 120,
    QualityHdr = 125,
    QualityDolby = 126,
    Quality8k = 127,
}

/// 音频音质，取值为接口中的音频 id，数值大小与音质高低并不一致
#[derive(Debug, Clone, Copy, strum::FromRepr, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioQuality {
    Quality64k = 30216,
    Quality132k = 30232,
    QualityDolby = 30250,
    QualityHiRES = 30251,
    Quality192k = 30280,
}

impl AudioQuality {
    /// 杜比与 Hi-RES 排在 192k 之后
    fn rank(self) -> u8 {
        match self {
            Self::Quality64k => 0,
            Self::Quality132k => 1,
            Self::Quality192k => 2,
            Self::QualityDolby => 3,
            Self::QualityHiRES => 4,
        }
    }
}

impl Ord for AudioQuality {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for AudioQuality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug, Clone, Copy, strum::EnumString, strum::Display, strum::AsRefStr, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum VideoCodecs {
    #[strum(serialize = "hev")]
    HEV,
    #[strum(serialize = "avc")]
    AVC,
    #[strum(serialize = "av01")]
    AV1,
}

impl VideoCodecs {
    /// 接口给出的是完整的编码描述，如 av01.0.08M.08，只看前缀；dvh1、hvc1 等不在支持范围内
    fn detect(codecs: &str) -> Option<Self> {
        [Self::HEV, Self::AVC, Self::AV1]
            .into_iter()
            .find(|c| codecs.starts_with(c.as_ref()))
    }
}

/// 视频流的筛选偏好，codecs 越靠前优先级越高
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOption {
    pub video_max_quality: VideoQuality,
    pub video_min_quality: VideoQuality,
    pub audio_max_quality: AudioQuality,
    pub audio_min_quality: AudioQuality,
    pub codecs: Vec<VideoCodecs>,
    pub no_dolby_video: bool,
    pub no_dolby_audio: bool,
    pub no_hdr: bool,
    pub no_hires: bool,
}

impl Default for FilterOption {
    fn default() -> Self {
        Self {
            video_max_quality: VideoQuality::Quality8k,
            video_min_quality: VideoQuality::Quality360p,
            audio_max_quality: AudioQuality::QualityHiRES,
            audio_min_quality: AudioQuality::Quality64k,
            codecs: vec![VideoCodecs::AV1, VideoCodecs::HEV, VideoCodecs::AVC],
            no_dolby_video: false,
            no_dolby_audio: false,
            no_hdr: false,
            no_hires: false,
        }
    }
}

impl FilterOption {
    /// 不在偏好列表中的编码返回 None，否则越靠前的编码值越大
    fn codec_preference(&self, codecs: VideoCodecs) -> Option<usize> {
        let idx = self.codecs.iter().position(|c| *c == codecs)?;
        Some(self.codecs.len() - idx)
    }

    fn accepts_video(&self, quality: VideoQuality) -> bool {
        (self.video_min_quality..=self.video_max_quality).contains(&quality)
            && !(self.no_hdr && quality == VideoQuality::QualityHdr)
            && !(self.no_dolby_video && quality == VideoQuality::QualityDolby)
    }

    fn accepts_audio(&self, quality: AudioQuality) -> bool {
        (self.audio_min_quality..=self.audio_max_quality).contains(&quality)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stream {
    Flv(String),
    Html5Mp4(String),
    EpisodeTryMp4(String),
    DashVideo {
        url: String,
        quality: VideoQuality,
        codecs: VideoCodecs,
    },
    DashAudio {
        url: String,
        quality: AudioQuality,
    },
}

impl Stream {
    pub fn url(&self) -> &str {
        match self {
            Self::Flv(url) | Self::Html5Mp4(url) | Self::EpisodeTryMp4(url) => url,
            Self::DashVideo { url, .. } | Self::DashAudio { url, .. } => url,
        }
    }
}

/// 筛选结果：单个混合流，或者分离的视频与音频流；无声视频（如 BV1J7411H7KQ）没有音频流
#[derive(Debug, Clone, PartialEq)]
pub enum BestStream {
    VideoAudio { video: Stream, audio: Option<Stream> },
    Mixed(Stream),
}

/// playurl 接口 data 字段中用到的部分
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayUrlInfo {
    format: Option<String>,
    is_html5: Option<bool>,
    durl: Option<Vec<Durl>>,
    dash: Option<Dash>,
}

#[derive(Debug, Deserialize)]
struct Durl {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dash {
    video: Option<Vec<DashTrack>>,
    audio: Option<Vec<DashTrack>>,
    flac: Option<Flac>,
    dolby: Option<Dolby>,
}

#[derive(Debug, Deserialize)]
struct DashTrack {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: String,
    id: u64,
    #[serde(default)]
    codecs: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Flac {
    audio: Option<DashTrack>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dolby {
    audio: Option<Vec<DashTrack>>,
}

pub struct PageAnalyzer {
    info: PlayUrlInfo,
}

impl PageAnalyzer {
    pub fn new(info: serde_json::Value) -> Result<Self> {
        Ok(Self {
            info: serde_json::from_value(info).context("invalid playurl response")?,
        })
    }

    /// 有 durl 时是单个混合流，format 决定具体类型
    fn mixed_stream(&self) -> Option<Stream> {
        let url = self.info.durl.as_ref()?.first()?.url.clone();
        let is_mp4 = self.info.format.as_deref().is_some_and(|f| f.starts_with("mp4"));
        Some(match (is_mp4, self.info.is_html5.unwrap_or(false)) {
            (false, _) => Stream::Flv(url),
            (true, true) => Stream::Html5Mp4(url),
            (true, false) => Stream::EpisodeTryMp4(url),
        })
    }

    /// 画质优先，同画质时按编码偏好
    fn best_video(dash: &Dash, filter_option: &FilterOption) -> Option<Stream> {
        dash.video
            .iter()
            .flatten()
            .filter_map(|track| {
                let quality = VideoQuality::from_repr(track.id as usize)?;
                let codecs = VideoCodecs::detect(&track.codecs)?;
                let preference = filter_option.codec_preference(codecs)?;
                filter_option
                    .accepts_video(quality)
                    .then_some(((quality, preference), track, codecs))
            })
            .max_by_key(|(key, _, _)| *key)
            .map(|((quality, _), track, codecs)| Stream::DashVideo {
                url: track.base_url.clone(),
                quality,
                codecs,
            })
    }

    /// 普通音频、hi-res 与杜比全景声中音质最高的一个
    fn best_audio(dash: &Dash, filter_option: &FilterOption) -> Option<Stream> {
        let hires = dash
            .flac
            .as_ref()
            .filter(|_| !filter_option.no_hires)
            .and_then(|flac| flac.audio.as_ref());
        let dolby = dash
            .dolby
            .as_ref()
            .filter(|_| !filter_option.no_dolby_audio)
            .and_then(|dolby| dolby.audio.as_ref());
        dash.audio
            .iter()
            .flatten()
            .chain(hires)
            .chain(dolby.into_iter().flatten())
            .filter_map(|track| {
                let quality = AudioQuality::from_repr(track.id as usize)?;
                filter_option.accepts_audio(quality).then_some((quality, track))
            })
            .max_by_key(|(quality, _)| *quality)
            .map(|(quality, track)| Stream::DashAudio {
                url: track.base_url.clone(),
                quality,
            })
    }

    pub fn best_stream(&self, filter_option: &FilterOption) -> Result<BestStream> {
        if let Some(stream) = self.mixed_stream() {
            return Ok(BestStream::Mixed(stream));
        }
        let dash = self.info.dash.as_ref().ok_or(BiliError::StreamsEmpty)?;
        let video = Self::best_video(dash, filter_option).ok_or(BiliError::StreamsEmpty)?;
        Ok(BestStream::VideoAudio {
            video,
            audio: Self::best_audio(dash, filter_option),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn dash_fixture() -> serde_json::Value {
        json!({
            "format": "flv",
            "dash": {
                "video": [
                    {"baseUrl": "https://v/120-avc", "id": 120, "codecs": "avc1.640033"},
                    {"baseUrl": "https://v/120-hev", "id": 120, "codecs": "hev1.1.6.L153.90"},
                    {"baseUrl": "https://v/80-av1", "id": 80, "codecs": "av01.0.08M.08"},
                    {"baseUrl": "https://v/126-dolby", "id": 126, "codecs": "dvh1.08.09"},
                    {"baseUrl": "https://v/64-avc", "id": 64, "codecs": "avc1.64001F"}
                ],
                "audio": [
                    {"baseUrl": "https://a/30216", "id": 30216, "codecs": "mp4a.40.2"},
                    {"baseUrl": "https://a/30280", "id": 30280, "codecs": "mp4a.40.2"}
                ],
                "flac": {"audio": {"baseUrl": "https://a/flac", "id": 30251, "codecs": "fLaC"}},
                "dolby": {"type": 0, "audio": null}
            }
        })
    }

    #[test]
    fn test_quality_order() {
        assert!(
            [
                VideoQuality::Quality360p,
                VideoQuality::Quality480p,
                VideoQuality::Quality720p,
                VideoQuality::Quality1080p,
                VideoQuality::Quality1080pPLUS,
                VideoQuality::Quality1080p60,
                VideoQuality::Quality4k,
                VideoQuality::QualityHdr,
                VideoQuality::QualityDolby,
                VideoQuality::Quality8k
            ]
            .is_sorted()
        );
        assert!(
            [
                AudioQuality::Quality64k,
                AudioQuality::Quality132k,
                AudioQuality::Quality192k,
                AudioQuality::QualityDolby,
                AudioQuality::QualityHiRES,
            ]
            .is_sorted()
        );
    }

    #[test]
    fn test_best_dash_stream() {
        let analyzer = PageAnalyzer::new(dash_fixture()).unwrap();
        let best = analyzer.best_stream(&FilterOption::default()).unwrap();
        // 最高画质 120 有 avc 与 hev 两种编码，默认偏好中 hev 比 avc 靠前
        assert_eq!(
            best,
            BestStream::VideoAudio {
                video: Stream::DashVideo {
                    url: "https://v/120-hev".to_string(),
                    quality: VideoQuality::Quality4k,
                    codecs: VideoCodecs::HEV,
                },
                audio: Some(Stream::DashAudio {
                    url: "https://a/flac".to_string(),
                    quality: AudioQuality::QualityHiRES,
                }),
            }
        );
    }

    #[test]
    fn test_filter_bounds_and_codecs() {
        let analyzer = PageAnalyzer::new(dash_fixture()).unwrap();
        let filter_option = FilterOption {
            video_max_quality: VideoQuality::Quality1080p,
            codecs: vec![VideoCodecs::AVC],
            no_hires: true,
            ..FilterOption::default()
        };
        let BestStream::VideoAudio { video, audio } = analyzer.best_stream(&filter_option).unwrap() else {
            panic!("expect separated streams");
        };
        assert_eq!(video.url(), "https://v/64-avc");
        assert_eq!(audio.unwrap().url(), "https://a/30280");
    }

    #[test]
    fn test_mixed_and_silent_stream() {
        let analyzer = PageAnalyzer::new(json!({
            "format": "flv480",
            "durl": [{"url": "https://m/flv", "order": 1}]
        }))
        .unwrap();
        assert_eq!(
            analyzer.best_stream(&FilterOption::default()).unwrap(),
            BestStream::Mixed(Stream::Flv("https://m/flv".to_string()))
        );
        let analyzer = PageAnalyzer::new(json!({
            "format": "mp4",
            "is_html5": true,
            "durl": [{"url": "https://m/mp4"}]
        }))
        .unwrap();
        assert_eq!(
            analyzer.best_stream(&FilterOption::default()).unwrap(),
            BestStream::Mixed(Stream::Html5Mp4("https://m/mp4".to_string()))
        );
        let analyzer = PageAnalyzer::new(json!({
            "dash": {
                "video": [{"baseUrl": "https://v/64", "id": 64, "codecs": "avc1.64001F"}],
                "audio": null
            }
        }))
        .unwrap();
        assert!(matches!(
            analyzer.best_stream(&FilterOption::default()).unwrap(),
            BestStream::VideoAudio { audio: None, .. }
        ));
    }

    #[test]
    fn test_empty_streams() {
        let analyzer = PageAnalyzer::new(json!({"dash": {"video": null, "audio": null}})).unwrap();
        let err = analyzer.best_stream(&FilterOption::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<BiliError>(), Some(BiliError::StreamsEmpty)));
        let analyzer = PageAnalyzer::new(json!({})).unwrap();
        assert!(analyzer.best_stream(&FilterOption::default()).is_err());
    }
}
