use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

// 跨数据库的数组列只能包一层 json，sqlite 不支持裸 Vec
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct StringVec(pub Vec<String>);

impl From<Vec<String>> for StringVec {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl From<StringVec> for Vec<String> {
    fn from(value: StringVec) -> Self {
        value.0
    }
}
