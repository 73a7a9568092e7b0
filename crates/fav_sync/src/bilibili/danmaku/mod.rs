mod ass_writer;
mod canvas;
mod comment;
mod model;
mod writer;

pub use ass_writer::AssWriter;
pub use canvas::{DanmakuOption, Dialogue, Motion};
pub use comment::Comment;
pub use model::{DanmakuElem, DmSegMobileReply};
pub use writer::DanmakuWriter;
