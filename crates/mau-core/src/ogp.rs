//! Open Graph metadata fetch for link cards.

use scraper::{Html, Selector};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Link-card metadata: og: tags first, standard tags as fallback.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OgpData {
    pub title: String,
    pub description: String,
    pub image: String,
}

/// Fetches OGP metadata for a URL. Returns None on any failure; link cards
/// are decoration, not a failure mode.
pub async fn fetch_ogp(url: &str) -> Option<OgpData> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .ok()?;

    let html = match client.get(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!("OGP body read failed for {}: {}", url, e);
                return None;
            }
        },
        Err(e) => {
            warn!("OGP fetch failed for {}: {}", url, e);
            return None;
        }
    };

    let data = parse_ogp(&html, url);
    info!("OGP fetched for {}", url.chars().take(50).collect::<String>());
    Some(data)
}

/// Pulls og:title / og:description / og:image, falling back to `<title>` and
/// the standard description meta, then to the URL itself.
pub fn parse_ogp(html: &str, url: &str) -> OgpData {
    let document = Html::parse_document(html);

    let title = meta_property(&document, "og:title")
        .or_else(|| {
            let selector = Selector::parse("title").ok()?;
            document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| url.to_string());

    let description = meta_property(&document, "og:description")
        .or_else(|| meta_name(&document, "description"))
        .unwrap_or_default();

    let image = meta_property(&document, "og:image").unwrap_or_default();

    OgpData { title, description, image }
}

fn meta_property(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[property="{}"]"#, property)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.to_string())
        .filter(|c| !c.is_empty())
}

fn meta_name(document: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[name="{}"]"#, name)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.to_string())
        .filter(|c| !c.is_empty())
}
