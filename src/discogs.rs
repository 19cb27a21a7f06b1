//! # Discogs API Client
//!
//! Thin client for the three Discogs endpoints the sync paths need: the
//! paginated collection listing, master releases, and single releases.
//! Failures are typed so callers can tell a rate limit from a dead network
//! from a missing resource.

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::db::NewAlbum;

pub const API_BASE: &str = "https://api.discogs.com";

/// Distinguishable failures from the Discogs collaborator.
#[derive(Debug, Error)]
pub enum DiscogsError {
    #[error("Discogs rate limit hit")]
    RateLimited,
    #[error("Discogs resource not found")]
    NotFound,
    #[error("Discogs API error: HTTP {0}")]
    Http(u16),
    #[error("Couldn't reach Discogs — check your internet connection and try again.")]
    Network(String),
    #[error("unexpected Discogs response: {0}")]
    Decode(String),
}

impl From<ureq::Error> for DiscogsError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(429, _) => DiscogsError::RateLimited,
            ureq::Error::Status(404, _) => DiscogsError::NotFound,
            ureq::Error::Status(code, _) => DiscogsError::Http(code),
            ureq::Error::Transport(transport) => DiscogsError::Network(transport.to_string()),
        }
    }
}

fn default_pages() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_pages")]
    pub pages: u32,
}

/// One page of the user's collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionPage {
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub releases: Vec<CollectionItem>,
}

impl CollectionPage {
    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.pagination
            .as_ref()
            .map_or(1, |p| p.pages)
            .max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionItem {
    pub basic_information: BasicInformation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicInformation {
    pub id: i64,
    #[serde(default)]
    pub master_id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub artists: Vec<ArtistCredit>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistCredit {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatInfo {
    pub name: String,
}

/// Year and cover image pulled from a master or release detail page.
#[derive(Debug, Clone, Default)]
pub struct ReleaseDetail {
    pub year: Option<i32>,
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailPayload {
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    images: Vec<ImageRef>,
}

#[derive(Debug, Deserialize)]
struct ImageRef {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    resource_url: Option<String>,
}

impl From<DetailPayload> for ReleaseDetail {
    fn from(payload: DetailPayload) -> Self {
        let cover_image_url = payload
            .images
            .into_iter()
            .next()
            .and_then(|image| non_empty(image.uri).or_else(|| non_empty(image.resource_url)));
        ReleaseDetail {
            year: year_or_none(payload.year),
            cover_image_url,
        }
    }
}

#[must_use]
pub fn release_url(release_id: i64) -> String {
    format!("https://www.discogs.com/release/{release_id}")
}

#[must_use]
pub fn master_url(master_id: i64) -> String {
    format!("https://www.discogs.com/master/{master_id}")
}

/// Discogs uses 0 for "no year" and empty strings for missing images.
fn year_or_none(year: Option<i32>) -> Option<i32> {
    year.filter(|y| *y != 0)
}

fn id_or_none(id: Option<i64>) -> Option<i64> {
    id.filter(|v| *v != 0)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

/// Flatten one collection item into a domain album record.
#[must_use]
pub fn parse_release(info: &BasicInformation) -> NewAlbum {
    let artist = if info.artists.is_empty() {
        "Unknown".to_string()
    } else {
        info.artists
            .iter()
            .map(|credit| credit.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let format = info.formats.first().map(|f| f.name.clone());
    let master_id = id_or_none(info.master_id);

    NewAlbum {
        discogs_release_id: info.id,
        discogs_master_id: master_id,
        artist,
        title: info.title.clone(),
        release_year: year_or_none(info.year),
        cover_image_url: non_empty(info.cover_image.clone())
            .or_else(|| non_empty(info.thumb.clone())),
        genres: info.genres.clone(),
        styles: info.styles.clone(),
        format,
        discogs_url: release_url(info.id),
        master_url: master_id.map(master_url),
    }
}

/// Authenticated HTTP client for the Discogs API.
pub struct DiscogsClient {
    agent: ureq::Agent,
    token: String,
    username: String,
    user_agent: String,
}

impl DiscogsClient {
    #[must_use]
    pub fn new(token: &str, username: &str, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();
        Self {
            agent,
            token: token.to_string(),
            username: username.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, DiscogsError> {
        debug!("GET {url}");
        let mut request = self
            .agent
            .get(url)
            .set("Authorization", &format!("Discogs token={}", self.token))
            .set("User-Agent", &self.user_agent);
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request.call()?;
        response
            .into_json::<T>()
            .map_err(|err| DiscogsError::Decode(err.to_string()))
    }

    /// One page of the user's collection, newest additions first.
    pub fn fetch_collection_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<CollectionPage, DiscogsError> {
        let url = format!(
            "{API_BASE}/users/{}/collection/folders/0/releases",
            self.username
        );
        self.get_json(
            &url,
            &[
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
                ("sort", "added".to_string()),
                ("sort_order", "desc".to_string()),
            ],
        )
    }

    /// Original-issue year and cover image from a master release.
    pub fn fetch_master(&self, master_id: i64) -> Result<ReleaseDetail, DiscogsError> {
        let url = format!("{API_BASE}/masters/{master_id}");
        let payload: DetailPayload = self.get_json(&url, &[])?;
        Ok(payload.into())
    }

    /// Year and cover image from a single release.
    pub fn fetch_release(&self, release_id: i64) -> Result<ReleaseDetail, DiscogsError> {
        let url = format!("{API_BASE}/releases/{release_id}");
        let payload: DetailPayload = self.get_json(&url, &[])?;
        Ok(payload.into())
    }
}
