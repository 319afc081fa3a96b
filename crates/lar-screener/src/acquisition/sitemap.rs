//! Parse sitemap.xml and sitemap index files, and walk an index down to
//! page URLs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::http_client::Fetcher;

/// How many index levels below the root are followed.
pub const MAX_SITEMAP_DEPTH: usize = 2;

/// Child sitemaps fetched per index.
pub const MAX_CHILD_SITEMAPS: usize = 50;

/// A page entry from a `<urlset>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<DateTime<Utc>>,
}

/// One parsed sitemap document: page entries plus child sitemaps (index files).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sitemap {
    pub entries: Vec<SitemapEntry>,
    pub children: Vec<String>,
}

/// Which `<loc>`-bearing element the reader is inside.
#[derive(Clone, Copy, PartialEq)]
enum Section {
    Outside,
    Page,
    ChildSitemap,
}

/// The text-bearing child element being read.
#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Loc,
    Lastmod,
}

/// Parse a `<urlset>` or `<sitemapindex>` document. Namespaces are ignored;
/// entries without a `<loc>` are dropped.
pub fn parse_sitemap(xml: &str) -> Result<Sitemap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut sitemap = Sitemap::default();
    let mut section = Section::Outside;
    let mut field = Field::None;
    let mut loc = String::new();
    let mut lastmod = String::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            anyhow::anyhow!("sitemap XML error at byte {}: {e}", reader.buffer_position())
        })?;
        match event {
            Event::Start(tag) => match tag.local_name().as_ref() {
                b"url" => {
                    section = Section::Page;
                    loc.clear();
                    lastmod.clear();
                }
                b"sitemap" => {
                    section = Section::ChildSitemap;
                    loc.clear();
                }
                b"loc" => field = Field::Loc,
                b"lastmod" => field = Field::Lastmod,
                _ => field = Field::None,
            },
            Event::End(tag) => {
                let closes_entry = match (section, tag.local_name().as_ref()) {
                    (Section::Page, b"url") => {
                        if !loc.is_empty() {
                            sitemap.entries.push(SitemapEntry {
                                url: std::mem::take(&mut loc),
                                lastmod: parse_lastmod(&lastmod),
                            });
                        }
                        true
                    }
                    (Section::ChildSitemap, b"sitemap") => {
                        if !loc.is_empty() {
                            sitemap.children.push(std::mem::take(&mut loc));
                        }
                        true
                    }
                    _ => false,
                };
                if closes_entry {
                    section = Section::Outside;
                }
                field = Field::None;
            }
            Event::Text(text) if section != Section::Outside => {
                let value = text.unescape().map(|v| v.trim().to_string()).unwrap_or_default();
                match field {
                    Field::Loc => loc = value,
                    Field::Lastmod if section == Section::Page => lastmod = value,
                    _ => {}
                }
            }
            Event::CData(data) if section != Section::Outside && field == Field::Loc => {
                loc = String::from_utf8_lossy(&data).trim().to_string();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(sitemap)
}

/// `<lastmod>` as a W3C datetime or a bare date.
fn parse_lastmod(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

/// Gzipped sitemaps are skipped rather than decompressed.
fn is_gzipped(url: &str) -> bool {
    url.split(['?', '#'])
        .next()
        .map(|path| path.to_ascii_lowercase().ends_with(".gz"))
        .unwrap_or(false)
}

/// Fetch `root` and every page URL reachable through sitemap indexes, up to
/// [`MAX_SITEMAP_DEPTH`] levels and [`MAX_CHILD_SITEMAPS`] children per
/// index. Returns `(sitemap_url, page_url)` pairs in document order.
///
/// Only a failure on the root is an error; broken children are logged and
/// skipped.
pub async fn collect_sitemap_urls(
    fetcher: &dyn Fetcher,
    root: &str,
    timeout_ms: u64,
) -> Result<Vec<(String, String)>> {
    let mut pages = Vec::new();
    let mut level = vec![root.to_string()];

    for depth in 0..=MAX_SITEMAP_DEPTH {
        let mut next = Vec::new();
        for sitemap_url in &level {
            if is_gzipped(sitemap_url) {
                tracing::debug!("skipping gzipped sitemap {sitemap_url}");
                continue;
            }
            let xml = match fetcher.fetch(sitemap_url, timeout_ms).await {
                Ok(xml) => xml,
                Err(e) if depth == 0 => return Err(e.into()),
                Err(e) => {
                    tracing::debug!("child sitemap failed: {e}");
                    continue;
                }
            };
            let parsed = match parse_sitemap(&xml) {
                Ok(parsed) => parsed,
                Err(e) if depth == 0 => return Err(e.context(format!("sitemap {sitemap_url}"))),
                Err(e) => {
                    tracing::debug!("unparseable sitemap {sitemap_url}: {e}");
                    continue;
                }
            };
            pages.extend(
                parsed
                    .entries
                    .into_iter()
                    .map(|entry| (sitemap_url.clone(), entry.url)),
            );
            next.extend(parsed.children.into_iter().take(MAX_CHILD_SITEMAPS));
        }
        if next.is_empty() {
            break;
        }
        if depth == MAX_SITEMAP_DEPTH {
            tracing::debug!("sitemap depth limit reached, {} indexes not followed", next.len());
        }
        level = next;
    }

    Ok(pages)
}
