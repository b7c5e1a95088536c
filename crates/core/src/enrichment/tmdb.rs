//! TMDB (The Movie Database) enricher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EnrichedMetadata, EnrichmentError, MetadataEnricher, MetadataQuery};
use crate::item::ContentCategory;

/// TMDB API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbConfig {
    /// TMDB API key (required). Never serialized.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Base URL (default: https://api.themoviedb.org/3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Response language, e.g. `en-US`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

pub struct TmdbEnricher {
    client: Client,
    base_url: String,
    api_key: String,
    language: Option<String>,
}

impl TmdbEnricher {
    pub fn new(config: TmdbConfig) -> Result<Self, EnrichmentError> {
        if config.api_key.is_empty() {
            return Err(EnrichmentError::NotConfigured(
                "TMDB API key is required".to_string(),
            ));
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let base_url = config
            .base_url
            .unwrap_or_else(|| "https://api.themoviedb.org/3".to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            language: config.language,
        })
    }

    async fn search(
        &self,
        endpoint: &str,
        query: &MetadataQuery,
        year_param: &str,
    ) -> Result<Vec<SearchResult>, EnrichmentError> {
        let url = format!("{}/search/{}", self.base_url, endpoint);

        debug!("TMDB {} search: query='{}', year={:?}", endpoint, query.title, query.year);

        let mut request = self
            .client
            .get(&url)
            .query(&[("api_key", &self.api_key), ("query", &query.title)]);
        if let Some(year) = query.year {
            request = request.query(&[(year_param, &year.to_string())]);
        }
        if let Some(language) = &self.language {
            request = request.query(&[("language", language)]);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == 401 {
            return Err(EnrichmentError::NotConfigured(
                "Invalid TMDB API key".to_string(),
            ));
        }
        if status == 429 {
            return Err(EnrichmentError::RateLimitExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            EnrichmentError::ParseError(format!("Failed to parse {} search response: {}", endpoint, e))
        })?;
        Ok(body.results)
    }
}

#[async_trait]
impl MetadataEnricher for TmdbEnricher {
    fn name(&self) -> &str {
        "tmdb"
    }

    async fn enrich(&self, query: &MetadataQuery) -> Result<Option<EnrichedMetadata>, EnrichmentError> {
        let results = match query.category {
            ContentCategory::Movie => self.search("movie", query, "year").await?,
            ContentCategory::SeriesEpisode | ContentCategory::SerialEpisode => {
                self.search("tv", query, "first_air_date_year").await?
            }
        };
        Ok(results.into_iter().next().map(SearchResult::into_metadata))
    }
}

// TMDB API response types (private)

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Movie and TV results share this shape; movies use `title`/`release_date`,
/// TV uses `name`/`first_air_date`.
#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
}

impl SearchResult {
    fn into_metadata(self) -> EnrichedMetadata {
        let release_year = self
            .release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
            .and_then(parse_year);
        EnrichedMetadata {
            provider: "tmdb".to_string(),
            external_id: self.id.to_string(),
            title: self.title.or(self.name).unwrap_or_default(),
            overview: self.overview.filter(|o| !o.is_empty()),
            release_year,
            poster_path: self.poster_path,
        }
    }
}

fn parse_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let result = TmdbEnricher::new(TmdbConfig {
            api_key: String::new(),
            base_url: None,
            language: None,
        });
        assert!(matches!(result, Err(EnrichmentError::NotConfigured(_))));
    }

    #[test]
    fn test_movie_result_into_metadata() {
        let json = r#"{"results":[{"id":438631,"title":"Dune","release_date":"2021-09-15",
            "overview":"Paul Atreides...","poster_path":"/d5NXSklXo0qyIYkgV94XAgMIckC.jpg"}]}"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let meta = response.results.into_iter().next().unwrap().into_metadata();
        assert_eq!(meta.external_id, "438631");
        assert_eq!(meta.title, "Dune");
        assert_eq!(meta.release_year, Some(2021));
        assert_eq!(meta.provider, "tmdb");
    }

    #[test]
    fn test_tv_result_into_metadata() {
        let json = r#"{"results":[{"id":70523,"name":"Dark","first_air_date":"2017-12-01","overview":""}]}"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let meta = response.results.into_iter().next().unwrap().into_metadata();
        assert_eq!(meta.title, "Dark");
        assert_eq!(meta.release_year, Some(2017));
        assert_eq!(meta.overview, None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1999-03-31"), Some(1999));
        assert_eq!(parse_year(""), None);
        assert_eq!(parse_year("soon"), None);
    }
}
