mod custom_type;
mod entities;

pub use custom_type::*;
pub use entities::*;
