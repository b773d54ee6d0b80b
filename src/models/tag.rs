use serde::{Deserialize, Serialize};

/// A tag; `name` is always stored lowercase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// A tag together with a usage or co-occurrence count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagCount {
    pub id: i64,
    pub name: String,
    pub count: u64,
}

/// One entry of a weighted tag cloud
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudTag {
    pub name: String,
    /// Normalized logarithmic weight in `[0, 1]`
    pub weight: f64,
    pub count: u64,
    /// Font size in `[min_size, max_size]`
    pub size: u32,
}
