use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BiliError {
    /// 响应缺少 code 或 message
    #[error("malformed api response: {0}")]
    InvalidResponse(String),
    #[error("api error {0}: {1}")]
    RequestFailed(i64, String),
    #[error("blocked by risk control: {0}")]
    RiskControlOccurred(String),
    /// 通常也是风控导致的
    #[error("play info contains no stream")]
    StreamsEmpty,
}

impl BiliError {
    /// 远端返回的业务错误码，非业务错误返回 None
    pub fn code(&self) -> Option<i64> {
        match self {
            BiliError::RequestFailed(code, _) => Some(*code),
            _ => None,
        }
    }
}
