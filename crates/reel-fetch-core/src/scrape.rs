//! Markup parsing for the torrent index
//!
//! Best-effort extraction from the listing and detail pages. Anything that
//! does not look like the expected structure is reported as absent and left
//! to the caller to skip.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static RESULTS_TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.table-list").expect("valid table selector"));

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid row selector"));

static DETAIL_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"td.name a[href*="/torrent/"]"#).expect("valid link selector")
});

static SEEDS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.seeds").expect("valid seeds selector"));

static LEECHES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.leeches").expect("valid leeches selector"));

static SIZE: Lazy<Selector> = Lazy::new(|| Selector::parse("td.size").expect("valid size selector"));

static MAGNET_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href^="magnet:"]"#).expect("valid magnet selector"));

static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19[0-9]{2}|20[0-9]{2})\b").expect("valid year regex"));

static QUALITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(2160p|1080p|720p|480p|4k|uhd|web-?dl|webrip|bluray|brrip|bdrip|hdrip|dvdrip|hdtv|hdcam|cam)\b")
        .expect("valid quality regex")
});

/// One row of the search listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub title: String,
    /// Link to the detail page, possibly relative to the site root
    pub detail_href: String,
    pub seeders: u32,
    pub leechers: u32,
    pub size: String,
}

/// Parse the listing page.
///
/// `None` means the page has no results table at all; `Some(vec![])` means
/// the table exists but no row was usable.
pub fn parse_listing(html: &str) -> Option<Vec<ListingRow>> {
    let document = Html::parse_document(html);
    let table = document.select(&RESULTS_TABLE).next()?;

    let rows = table
        .select(&ROW)
        .filter(|row| row.children().filter_map(ElementRef::wrap).any(|c| c.value().name() == "td"))
        .filter_map(|row| {
            let parsed = parse_row(row);
            if parsed.is_none() {
                log::debug!("Skipping unparsable listing row");
            }
            parsed
        })
        .collect();

    Some(rows)
}

fn parse_row(row: ElementRef<'_>) -> Option<ListingRow> {
    let link = row.select(&DETAIL_LINK).next()?;
    let detail_href = link.value().attr("href")?.to_string();
    let title = element_text(link);
    if title.is_empty() {
        return None;
    }

    Some(ListingRow {
        title,
        detail_href,
        seeders: cell_count(row, &SEEDS),
        leechers: cell_count(row, &LEECHES),
        size: row.select(&SIZE).next().map(own_text).unwrap_or_default(),
    })
}

/// First magnet link on a detail page
pub fn find_magnet(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&MAGNET_LINK)
        .filter_map(|link| link.value().attr("href"))
        .map(str::trim)
        .find(|href| href.len() > "magnet:".len())
        .map(str::to_string)
}

/// Release year mentioned in a title
pub fn year_from_title(title: &str) -> Option<u16> {
    YEAR.captures(title).and_then(|caps| caps[1].parse().ok())
}

/// Quality label mentioned in a title, normalised to lowercase
pub fn quality_from_title(title: &str) -> Option<String> {
    QUALITY
        .captures(title)
        .map(|caps| caps[1].to_ascii_lowercase())
}

fn cell_count(row: ElementRef<'_>, selector: &Selector) -> u32 {
    row.select(selector)
        .next()
        .map(element_text)
        .and_then(|text| text.replace(',', "").parse().ok())
        .unwrap_or(0)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Text directly inside the element, ignoring nested tags.
/// The size cell carries a trailing `<span>` with the seed count.
fn own_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|node| node.value().as_text())
        .map(|text| &**text)
        .collect::<String>()
        .trim()
        .to_string()
}
