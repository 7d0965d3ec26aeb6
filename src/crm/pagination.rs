//! The two card-listing query conventions the CRM may speak.

use std::fmt;

/// Query shape for one page of the card listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaginationStyle {
    /// `?page=N&per_page=M`
    LaravelStyle,
    /// `?page[number]=N&page[size]=M`
    JsonApiStyle,
}

impl PaginationStyle {
    /// Probe order at the start of a scan.
    pub const PROBE_ORDER: [PaginationStyle; 2] =
        [PaginationStyle::LaravelStyle, PaginationStyle::JsonApiStyle];

    pub fn query(&self, page: u32, page_size: u32) -> [(&'static str, String); 2] {
        match self {
            PaginationStyle::LaravelStyle => {
                [("page", page.to_string()), ("per_page", page_size.to_string())]
            }
            PaginationStyle::JsonApiStyle => [
                ("page[number]", page.to_string()),
                ("page[size]", page_size.to_string()),
            ],
        }
    }
}

impl fmt::Display for PaginationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginationStyle::LaravelStyle => write!(f, "page/per_page"),
            PaginationStyle::JsonApiStyle => write!(f, "page[number]/page[size]"),
        }
    }
}
