//! Audio id to upstream URL mapping.

use std::collections::BTreeMap;

use stream_types::RouteInfo;

/// Built-in routes: four SoundHelix MP3s and the mux HLS test playlist.
pub const DEFAULT_ROUTES: [(&str, &str); 5] = [
    (
        "1",
        "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-1.mp3",
    ),
    (
        "2",
        "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-2.mp3",
    ),
    (
        "3",
        "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-3.mp3",
    ),
    (
        "4",
        "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-4.mp3",
    ),
    ("hls", "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8"),
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    pub fn with_defaults() -> Self {
        let mut table = Self::default();
        for (id, url) in DEFAULT_ROUTES {
            table.insert(id, url);
        }
        table
    }

    pub fn insert(&mut self, id: impl Into<String>, url: impl Into<String>) {
        self.routes.insert(id.into(), url.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.routes.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route listing for `GET /routes`.
    pub fn infos(&self) -> Vec<RouteInfo> {
        self.routes
            .iter()
            .map(|(id, url)| RouteInfo {
                id: id.clone(),
                path: format!("/audio/{id}"),
                stream_path: format!("/stream/audio/{id}"),
                url: url.clone(),
            })
            .collect()
    }
}

/// Route ids appear as a single path segment.
pub fn is_valid_route_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
