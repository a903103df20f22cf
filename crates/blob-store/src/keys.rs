//! Logical key layout inside the key-value store
//!
//! - category metadata: `[blob, <category>]`
//! - content-type record: `[blob, <category>, <key>, content-type]`
//! - embedded content: large value under `[blob, <category>, <key>]`

use embedded_kv::Key;

pub const ROOT: &str = "blob";
pub const CONTENT_TYPE: &str = "content-type";

pub fn root() -> Key {
    Key::from_parts([ROOT])
}

pub fn category(category: &str) -> Key {
    Key::from_parts([ROOT, category])
}

pub fn blob(category: &str, key: &str) -> Key {
    Key::from_parts([ROOT, category, key])
}

pub fn content_type(category: &str, key: &str) -> Key {
    Key::from_parts([ROOT, category, key, CONTENT_TYPE])
}
