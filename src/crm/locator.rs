// src/crm/locator.rs

//! Card search over the paginated CRM listing.
//!
//! A scan walks pages in increasing order, one request at a time. The first
//! page is used to probe which pagination convention the CRM speaks; the
//! scan then commits to that convention for every later page.
//!
//! Scope filtering happens client-side: every fetched card is checked
//! against the requested pipeline/status pair before matching.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};

use crate::crm::client::CrmClient;
use crate::crm::pagination::PaginationStyle;
use crate::error::{AppError, Result};
use crate::matching::{canonical, canonical_handle};
use crate::models::{Card, CardNeedle, MatchStrategy, SearchOptions, SearchScope, StagePair, TitleMode};

type PageKey = (PaginationStyle, u32, u32);

/// Cards collected from one stage for the sweep.
#[derive(Debug, Default)]
pub struct Collected {
    pub cards: Vec<Card>,
    /// Stopped on the page budget or the deadline before the end of data.
    pub truncated: bool,
}

/// Finds cards in the CRM.
pub struct CardLocator {
    client: CrmClient,
    /// Pages fetched by `collect` during one sweep run.
    page_cache: Mutex<HashMap<PageKey, Vec<Card>>>,
}

impl CardLocator {
    pub fn new(client: CrmClient) -> Self {
        Self {
            client,
            page_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &CrmClient {
        &self.client
    }

    /// First card matching `needle` within `scope`, or `None` when the scan
    /// ends without a hit.
    pub async fn find(
        &self,
        needle: &CardNeedle,
        scope: &SearchScope,
        options: &SearchOptions,
    ) -> Result<Option<Card>> {
        let stage = scope.resolve()?;
        let matcher = Matcher::new(needle, options);
        if matcher.is_empty() {
            log::debug!("Card search skipped: nothing to match on");
            return Ok(None);
        }

        let page_size = options.page_size.max(1);
        let deadline = Instant::now() + options.deadline;
        let mut style = None;

        for page in 1..=options.max_pages {
            let cards = match timeout_at(deadline, self.page(&mut style, page, page_size, false)).await {
                Ok(result) => result?,
                Err(_) => {
                    log::warn!(
                        "Card search hit its {:?} deadline at page {}",
                        options.deadline,
                        page
                    );
                    return Ok(None);
                }
            };

            let in_scope: Vec<&Card> = cards
                .iter()
                .filter(|card| stage.as_ref().is_none_or(|s| card.is_at(s)))
                .collect();
            if let Some(card) = matcher.pick(&in_scope) {
                log::debug!("Found card {} on page {}", card.id, page);
                return Ok(Some(card.clone()));
            }

            if cards.len() < page_size as usize {
                break;
            }
        }
        Ok(None)
    }

    /// Every card currently at `stage`, bounded by a page budget and a deadline.
    ///
    /// Pages are cached until [`clear_cache`](Self::clear_cache), so campaigns
    /// swept in the same run share fetches.
    pub async fn collect(
        &self,
        stage: &StagePair,
        page_budget: u32,
        page_size: u32,
        deadline: Instant,
    ) -> Result<Collected> {
        let page_size = page_size.max(1);
        let mut style = None;
        let mut collected = Collected {
            truncated: true,
            ..Collected::default()
        };

        for page in 1..=page_budget {
            let cards = match timeout_at(deadline, self.page(&mut style, page, page_size, true)).await {
                Ok(result) => result?,
                Err(_) => {
                    log::warn!("Collection for stage {} hit the sweep deadline at page {}", stage, page);
                    return Ok(collected);
                }
            };

            let end_of_data = cards.len() < page_size as usize;
            collected
                .cards
                .extend(cards.into_iter().filter(|card| card.is_at(stage)));
            if end_of_data {
                collected.truncated = false;
                break;
            }
        }

        if collected.truncated {
            log::warn!(
                "Collection for stage {} stopped at the page budget of {}",
                stage,
                page_budget
            );
        }
        Ok(collected)
    }

    /// Forget cached pages so the next run starts cold.
    pub async fn clear_cache(&self) {
        self.page_cache.lock().await.clear();
    }

    /// One page in the scan's committed convention, probing on first use.
    async fn page(
        &self,
        style: &mut Option<PaginationStyle>,
        page: u32,
        page_size: u32,
        cached: bool,
    ) -> Result<Vec<Card>> {
        if let Some(committed) = *style {
            return Ok(self
                .fetch(committed, page, page_size, cached)
                .await?
                .unwrap_or_else(|| {
                    log::debug!("Page {} ({}) has no data array, treating as end", page, committed);
                    Vec::new()
                }));
        }

        let [first, second] = PaginationStyle::PROBE_ORDER;
        match self.fetch(first, page, page_size, cached).await {
            Ok(Some(cards)) => {
                log::debug!("CRM pagination convention: {}", first);
                *style = Some(first);
                return Ok(cards);
            }
            Ok(None) => log::debug!("No data array with {}, trying {}", first, second),
            Err(AppError::Crm { status: Some(code), .. }) => {
                log::debug!("{} rejected with status {}, trying {}", first, code, second)
            }
            Err(e) => return Err(e),
        }

        match self.fetch(second, page, page_size, cached).await? {
            Some(cards) => {
                log::debug!("CRM pagination convention: {}", second);
                *style = Some(second);
                Ok(cards)
            }
            None => Err(AppError::crm(
                self.client.cards_url(),
                None,
                "no pagination convention returned a data array",
            )),
        }
    }

    async fn fetch(
        &self,
        style: PaginationStyle,
        page: u32,
        page_size: u32,
        cached: bool,
    ) -> Result<Option<Vec<Card>>> {
        let key = (style, page, page_size);
        if cached {
            if let Some(cards) = self.page_cache.lock().await.get(&key) {
                return Ok(Some(cards.clone()));
            }
        }

        let result = self.client.fetch_page(style, page, page_size).await?;
        if cached {
            if let Some(cards) = &result {
                self.page_cache.lock().await.insert(key, cards.clone());
            }
        }
        Ok(result)
    }
}

/// Canonicalized needle and match policy.
struct Matcher {
    handle: String,
    full_name: String,
    title_pattern: String,
    use_title: bool,
    title_mode: TitleMode,
}

impl Matcher {
    fn new(needle: &CardNeedle, options: &SearchOptions) -> Self {
        let full_name = canonical(needle.full_name.as_deref());
        Self {
            handle: canonical_handle(needle.username.as_deref()),
            title_pattern: canonical(Some(&format!("Chat with {full_name}"))),
            use_title: options.strategy == MatchStrategy::IdentityThenTitle && !full_name.is_empty(),
            full_name,
            title_mode: options.title_mode,
        }
    }

    fn is_empty(&self) -> bool {
        self.handle.is_empty() && !self.use_title
    }

    /// Identity matches win over title matches anywhere on the page.
    fn pick<'a>(&self, cards: &[&'a Card]) -> Option<&'a Card> {
        if !self.handle.is_empty() {
            if let Some(card) = cards
                .iter()
                .copied()
                .find(|card| canonical_handle(card.social_id()) == self.handle)
            {
                return Some(card);
            }
        }
        if self.use_title {
            return cards.iter().copied().find(|card| self.title_matches(&card.title));
        }
        None
    }

    fn title_matches(&self, title: &str) -> bool {
        let title = canonical(Some(title));
        match self.title_mode {
            TitleMode::Exact => title == self.title_pattern,
            TitleMode::Contains => title.contains(&self.full_name),
        }
    }
}
