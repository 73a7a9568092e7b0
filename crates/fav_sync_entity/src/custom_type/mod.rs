mod media;
mod string_vec;

pub use media::{MediaKind, MediaStatus};
pub use string_vec::StringVec;
