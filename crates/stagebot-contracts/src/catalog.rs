use indexmap::IndexMap;

/// Styles offered for every room.
pub const STYLES: [&str; 8] = [
    "French-modern",
    "Luxury",
    "Mid-Century",
    "Modern",
    "Natural",
    "Oriental",
    "Scandinavian",
    "Unique",
];

pub const ROOMS: [&str; 3] = ["Living room", "Dining room", "Bedroom"];

/// Asset directory key for a room: lower-case with spaces removed.
pub fn room_key(room: &str) -> String {
    room.trim().to_lowercase().replace(' ', "")
}

/// Asset directory key for a style: lower-case, spaces and underscores
/// become `-`.
pub fn style_key(style: &str) -> String {
    style.trim().to_lowercase().replace([' ', '_'], "-")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub room: String,
    pub style: String,
    pub room_key: String,
    pub style_key: String,
}

/// The room → styles catalog the asset tree is organised by.
///
/// Informational only: identity parsing never checks names against it.
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    rooms: IndexMap<String, Vec<String>>,
}

impl Default for StyleCatalog {
    fn default() -> Self {
        let mut rooms = IndexMap::new();
        for room in ROOMS {
            rooms.insert(
                room.to_string(),
                STYLES.iter().map(|style| (*style).to_string()).collect(),
            );
        }
        Self { rooms }
    }
}

impl StyleCatalog {
    pub fn new(rooms: IndexMap<String, Vec<String>>) -> Self {
        Self { rooms }
    }

    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    pub fn styles_for(&self, room: &str) -> &[String] {
        let wanted = room_key(room);
        self.rooms
            .iter()
            .find(|(name, _)| room_key(name) == wanted)
            .map(|(_, styles)| styles.as_slice())
            .unwrap_or(&[])
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.rooms
            .iter()
            .flat_map(|(room, styles)| {
                styles.iter().map(move |style| CatalogEntry {
                    room: room.clone(),
                    style: style.clone(),
                    room_key: room_key(room),
                    style_key: style_key(style),
                })
            })
            .collect()
    }

    pub fn contains(&self, room: &str, style: &str) -> bool {
        let wanted = style_key(style);
        self.styles_for(room)
            .iter()
            .any(|candidate| style_key(candidate) == wanted)
    }
}
