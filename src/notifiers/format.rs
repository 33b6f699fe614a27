//! Message rendering for Telegram. The rich form targets MarkdownV2; the
//! plain form carries the same content with no markup at all.

use crate::models::ListingRecord;
use crate::utils::text::truncate_chars;

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

const NO_TITLE: &str = "Без названия";
const NO_PRICE: &str = "Цена не указана";
const NO_LOCATION: &str = "Местоположение не указано";
const PRICE_LABEL: &str = "Цена:";
const LOCATION_LABEL: &str = "Место:";
const DATE_LABEL: &str = "Дата:";
const LINK_TEXT: &str = "Посмотреть на Avito";

pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Inside `(...)` of an inline link only `)` and `\` need escaping.
fn escape_link_target(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

struct Fields<'a> {
    title: &'a str,
    price: &'a str,
    location: &'a str,
    date: &'a str,
    description: String,
    url: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct MessageFormatter {
    description_limit: usize,
}

impl MessageFormatter {
    pub fn new(description_limit: usize) -> Self {
        Self { description_limit }
    }

    fn fields<'a>(&self, listing: &'a ListingRecord) -> Fields<'a> {
        Fields {
            title: listing.title.as_deref().unwrap_or(NO_TITLE),
            price: listing.price_text.as_deref().unwrap_or(NO_PRICE),
            location: listing.location.as_deref().unwrap_or(NO_LOCATION),
            date: listing.published_date_text.as_deref().unwrap_or(""),
            description: listing
                .description
                .as_deref()
                .map(|d| truncate_chars(d, self.description_limit))
                .unwrap_or_default(),
            url: listing.url.as_deref(),
        }
    }

    pub fn rich(&self, listing: &ListingRecord) -> String {
        let f = self.fields(listing);

        let mut sections = vec![
            format!("*{}*", escape_markdown_v2(f.title)),
            format!(
                "*{}* {}\n*{}* {}\n*{}* {}",
                escape_markdown_v2(PRICE_LABEL),
                escape_markdown_v2(f.price),
                escape_markdown_v2(LOCATION_LABEL),
                escape_markdown_v2(f.location),
                escape_markdown_v2(DATE_LABEL),
                escape_markdown_v2(f.date),
            ),
        ];
        if !f.description.is_empty() {
            sections.push(escape_markdown_v2(&f.description));
        }
        if let Some(url) = f.url {
            sections.push(format!(
                "[{}]({})",
                escape_markdown_v2(LINK_TEXT),
                escape_link_target(url)
            ));
        }

        sections.join("\n\n")
    }

    pub fn plain(&self, listing: &ListingRecord) -> String {
        let f = self.fields(listing);

        let mut sections = vec![
            f.title.to_string(),
            format!(
                "{} {}\n{} {}\n{} {}",
                PRICE_LABEL, f.price, LOCATION_LABEL, f.location, DATE_LABEL, f.date
            ),
        ];
        if !f.description.is_empty() {
            sections.push(f.description.clone());
        }
        if let Some(url) = f.url {
            sections.push(format!("{}: {}", LINK_TEXT, url));
        }

        sections.join("\n\n")
    }
}
