pub mod favorite;
pub mod page;
pub mod upper;
pub mod video;
