use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CUSTOMER: &str = "unknown";
pub const DEFAULT_ROOM: &str = "livingroom";
pub const DEFAULT_STYLE: &str = "modern";
pub const DEFAULT_VARIANT: &str = "1";

const SEGMENT_DELIMITER: char = '_';

/// Who and what a dropped photo is for, read from its file name.
///
/// `customer_room_style_variant_anything.jpg` is the full form. Names with
/// exactly four segments get variant `1`; shorter names get the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub customer: String,
    pub room: String,
    pub style: String,
    pub variant: String,
}

impl Default for JobIdentity {
    fn default() -> Self {
        Self {
            customer: DEFAULT_CUSTOMER.to_string(),
            room: DEFAULT_ROOM.to_string(),
            style: DEFAULT_STYLE.to_string(),
            variant: DEFAULT_VARIANT.to_string(),
        }
    }
}

impl JobIdentity {
    pub fn from_file_name(file_name: &str) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or(file_name);
        let parts: Vec<&str> = stem.split(SEGMENT_DELIMITER).collect();

        match parts.as_slice() {
            [customer, room, style, variant, _, ..] => Self {
                customer: (*customer).to_string(),
                room: (*room).to_string(),
                style: (*style).to_string(),
                variant: (*variant).to_string(),
            },
            [customer, room, style, _] => Self {
                customer: (*customer).to_string(),
                room: (*room).to_string(),
                style: (*style).to_string(),
                variant: DEFAULT_VARIANT.to_string(),
            },
            _ => Self::default(),
        }
    }

    /// Draft-folder name of the `index`-th render. Downstream consumers of the
    /// draft folder depend on this exact shape.
    pub fn render_name(&self, index: u32) -> String {
        format!(
            "{}_{}_{}_{}_render({index}).jpg",
            self.customer, self.room, self.style, self.variant
        )
    }
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.customer, self.room, self.style, self.variant
        )
    }
}
