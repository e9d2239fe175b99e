use crate::error::{Error, Result};
use crate::record::Taxon;
use crate::search::TaxonSource;
use log::{error, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const GBIF_API_URL: &str = "https://api.gbif.org/v1";
pub const MIN_QUERY_LEN: usize = 2;

/// A name usage as GBIF returns it from `/species/suggest` and
/// `/species/{key}`. Everything is optional until narrowed into a `Taxon`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GbifNameUsage {
    pub key: Option<u64>,
    pub scientific_name: Option<String>,
    pub canonical_name: Option<String>,
    pub rank: Option<String>,
    #[serde(alias = "taxonomicStatus")]
    pub status: Option<String>,
    pub accepted: Option<String>,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
}

impl GbifNameUsage {
    /// Usages without a key or scientific name are dropped.
    pub fn into_taxon(self) -> Option<Taxon> {
        let key = self.key.filter(|key| *key != 0)?;
        let scientific_name = self.scientific_name.filter(|name| !name.trim().is_empty())?;

        Some(Taxon {
            key,
            scientific_name,
            rank: self.rank.unwrap_or_else(|| "UNRANKED".to_string()),
            status: self.status,
            accepted_name: self.accepted,
            canonical_name: self.canonical_name,
            kingdom: self.kingdom,
            phylum: self.phylum,
            class_name: self.class_name,
            order: self.order,
            family: self.family,
            genus: self.genus,
            species: self.species,
        })
    }
}

pub fn species_page_url(key: u64) -> String {
    format!("https://www.gbif.org/species/{}", key)
}

pub struct GbifClient {
    client: Client,
    pub(crate) base_url: String,
    pub(crate) limit: usize,
}

impl GbifClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("insect-id/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: GBIF_API_URL.to_string(),
            limit: 10,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Suggest taxa matching `query`. Never fails: any transport, status or
    /// decoding problem is logged and yields no results.
    pub async fn search_taxa(&self, query: &str) -> Vec<Taxon> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Vec::new();
        }

        match self.fetch_suggestions(query).await {
            Ok(taxa) => {
                info!("Found {} taxa for '{}'", taxa.len(), query);
                taxa
            }
            Err(e) => {
                error!("Error searching taxa for '{}': {}", query, e);
                Vec::new()
            }
        }
    }

    async fn fetch_suggestions(&self, query: &str) -> Result<Vec<Taxon>> {
        let url = format!("{}/species/suggest", self.base_url);
        let limit = self.limit.to_string();
        let usages: Vec<GbifNameUsage> = self
            .client
            .get(&url)
            .query(&[("q", query), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(narrow(usages))
    }

    /// Full record for one taxon. Unlike search, errors reach the caller.
    pub async fn taxon_details(&self, key: u64) -> Result<Taxon> {
        let url = format!("{}/species/{}", self.base_url, key);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("taxon {}", key)));
        }
        let usage: GbifNameUsage = response.error_for_status()?.json().await?;

        usage.into_taxon().ok_or_else(|| {
            warn!("GBIF returned an incomplete record for taxon {}", key);
            Error::NotFound(format!("taxon {}", key))
        })
    }
}

impl TaxonSource for GbifClient {
    async fn search(&self, query: &str) -> Vec<Taxon> {
        self.search_taxa(query).await
    }
}

fn narrow(usages: Vec<GbifNameUsage>) -> Vec<Taxon> {
    let total = usages.len();
    let taxa: Vec<Taxon> = usages.into_iter().filter_map(GbifNameUsage::into_taxon).collect();
    if taxa.len() < total {
        warn!("Dropped {} GBIF results without a key or name", total - taxa.len());
    }
    taxa
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one HTTP request on a local port with `status` and `body`.
    /// The handle yields the request head that was received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (base_url, handle)
    }

    fn local_client(base_url: String) -> GbifClient {
        GbifClient {
            client: Client::builder().no_proxy().build().unwrap(),
            base_url,
            limit: 3,
        }
    }

    #[test]
    fn test_client_configuration() {
        let client = GbifClient::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:9999/v1/")
            .with_limit(3);

        assert_eq!(client.base_url, "http://localhost:9999/v1");
        assert_eq!(client.limit, 3);
    }

    #[test]
    fn test_default_configuration() {
        let client = GbifClient::new(Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, GBIF_API_URL);
        assert_eq!(client.limit, 10);
    }

    #[test]
    fn test_narrows_suggest_payload() {
        let payload = r#"[
            {"key": 1311477, "scientificName": "Danaus plexippus (Linnaeus, 1758)",
             "canonicalName": "Danaus plexippus", "rank": "SPECIES", "status": "ACCEPTED",
             "kingdom": "Animalia", "phylum": "Arthropoda", "class": "Insecta",
             "order": "Lepidoptera", "family": "Nymphalidae", "genus": "Danaus",
             "species": "Danaus plexippus", "higherClassificationMap": {"1": "Animalia"}},
            {"scientificName": "No key at all"},
            {"key": 42, "rank": "GENUS"},
            {"key": 7, "scientificName": "Papilio"}
        ]"#;
        let usages: Vec<GbifNameUsage> = serde_json::from_str(payload).unwrap();
        let taxa = narrow(usages);

        assert_eq!(taxa.len(), 2);
        assert_eq!(taxa[0].key, 1311477);
        assert_eq!(taxa[0].class_name.as_deref(), Some("Insecta"));
        assert_eq!(taxa[0].canonical_name.as_deref(), Some("Danaus plexippus"));
        assert_eq!(taxa[1].rank, "UNRANKED");
    }

    #[test]
    fn test_details_payload_maps_synonyms() {
        let payload = r#"{"key": 5, "scientificName": "Vanessa huntera",
            "rank": "SPECIES", "taxonomicStatus": "SYNONYM",
            "accepted": "Vanessa virginiensis (Drury, 1773)", "acceptedKey": 4}"#;
        let usage: GbifNameUsage = serde_json::from_str(payload).unwrap();
        let taxon = usage.into_taxon().unwrap();

        assert_eq!(taxon.status.as_deref(), Some("SYNONYM"));
        assert_eq!(
            taxon.accepted_name.as_deref(),
            Some("Vanessa virginiensis (Drury, 1773)")
        );
    }

    #[test]
    fn test_species_page_url() {
        assert_eq!(species_page_url(1311477), "https://www.gbif.org/species/1311477");
    }

    #[tokio::test]
    async fn test_short_query_skips_request() {
        let client = GbifClient::new(Duration::from_millis(50))
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        assert!(client.search_taxa(" a ").await.is_empty());
        assert!(client.search_taxa("").await.is_empty());
    }

    #[tokio::test]
    async fn test_search_fails_soft() {
        let client = GbifClient::new(Duration::from_millis(200))
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        assert!(client.search_taxa("Danaus").await.is_empty());
    }

    #[tokio::test]
    async fn test_search_sends_query_and_limit() {
        let body = r#"[{"key": 1311477, "scientificName": "Danaus plexippus", "rank": "SPECIES"},
                       {"canonicalName": "dropped"}]"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let taxa = local_client(base_url).search_taxa("  Danaus ").await;

        let request = server.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("GET /v1/species/suggest?"));
        assert!(request_line.contains("q=Danaus"));
        assert!(request_line.contains("limit=3"));
        assert_eq!(taxa.len(), 1);
        assert_eq!(taxa[0].key, 1311477);
    }

    #[tokio::test]
    async fn test_search_fails_soft_on_server_error() {
        let (base_url, server) = serve_once("500 Internal Server Error", r#"{"error": "boom"}"#).await;
        assert!(local_client(base_url).search_taxa("Danaus").await.is_empty());
        assert!(server.await.unwrap().contains("q=Danaus"));
    }

    #[tokio::test]
    async fn test_search_fails_soft_on_malformed_body() {
        let (base_url, server) = serve_once("200 OK", "<html>not json</html>").await;
        assert!(local_client(base_url).search_taxa("Danaus").await.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_details_not_found() {
        let (base_url, server) = serve_once("404 Not Found", "{}").await;
        let err = local_client(base_url).taxon_details(99).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert!(server.await.unwrap().starts_with("GET /v1/species/99 "));
    }
}
