/// HAL response envelopes and pagination
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 30;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub href: String,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: Link,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Link>,
}

impl Links {
    pub fn to_self(href: impl Into<String>) -> Self {
        Self {
            self_link: Link::new(href),
            first: None,
            last: None,
            prev: None,
            next: None,
        }
    }
}

/// A single resource with its links
#[derive(Debug, Serialize)]
pub struct Resource<T> {
    #[serde(flatten)]
    pub data: T,
    #[serde(rename = "_links")]
    pub links: Links,
}

impl<T: Serialize> Resource<T> {
    pub fn new(data: T, self_href: impl Into<String>) -> Self {
        Self {
            data,
            links: Links::to_self(self_href),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddedUsers<T> {
    pub users: Vec<T>,
}

/// One page of a user collection
#[derive(Debug, Serialize)]
pub struct UserPage<T> {
    #[serde(rename = "_links")]
    pub links: Links,
    #[serde(rename = "_embedded")]
    pub embedded: EmbeddedUsers<T>,
    /// Total number of items across all pages
    pub count: i64,
    pub page: i64,
}

/// `?page=&limit=` query parameters; pages are 1-based
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// Rows to skip; saturates for absurd page numbers
    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

/// Build self/first/last/prev/next links for a page of `total` items
pub fn page_links(base: &str, query: &PageQuery, total: i64) -> Links {
    let page = query.page();
    let limit = query.limit();
    let last_page = ((total + limit - 1) / limit).max(1);
    let href = |p: i64| Link::new(format!("{}?page={}&limit={}", base, p, limit));

    Links {
        self_link: href(page),
        first: Some(href(1)),
        last: Some(href(last_page)),
        prev: (page > 1).then(|| href(page - 1)),
        next: (page < last_page).then(|| href(page + 1)),
    }
}
