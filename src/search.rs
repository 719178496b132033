//! Site-wide search over likes, tags and fun facts.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::{FunFact, LikeItem, LikeWithTags, TagRef, TagWithItems};
use crate::db::Store;
use crate::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    Like,
    Dislike,
    Tag,
    FunFact,
}

impl HitKind {
    fn of(like: &LikeItem) -> Self {
        if like.is_like {
            HitKind::Like
        } else {
            HitKind::Dislike
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedBy {
    Name,
    Description,
}

impl MatchedBy {
    fn detect(term: &str, name: &str) -> Self {
        if name.to_lowercase().contains(&term.to_lowercase()) {
            MatchedBy::Name
        } else {
            MatchedBy::Description
        }
    }
}

/// A like or dislike carrying a matched tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedItem {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: HitKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(rename = "type")]
    pub kind: HitKind,
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub matched_by: MatchedBy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_items: Vec<RelatedItem>,
    /// Page to open for this hit.
    pub href: String,
    /// Element id to scroll into view once the page has loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl SearchHit {
    fn from_like(term: &str, row: LikeWithTags) -> Self {
        let like = row.like;
        Self {
            kind: HitKind::of(&like),
            id: like.id,
            matched_by: MatchedBy::detect(term, &like.item_name),
            title: like.item_name,
            description: like.description,
            tags: row.tags,
            related_items: Vec::new(),
            href: format!("/likes?highlight={}", like.id),
            anchor: Some(format!("like-{}", like.id)),
        }
    }

    fn from_tag(term: &str, row: TagWithItems) -> Self {
        let tag = row.tag;
        Self {
            kind: HitKind::Tag,
            id: tag.id,
            matched_by: MatchedBy::detect(term, &tag.name),
            title: tag.name,
            description: tag.description,
            tags: Vec::new(),
            related_items: row
                .items
                .into_iter()
                .map(|item| RelatedItem {
                    id: item.id,
                    kind: HitKind::of(&item),
                    title: item.item_name,
                })
                .collect(),
            href: format!("/tags/{}", tag.id),
            anchor: None,
        }
    }

    fn from_fun_fact(term: &str, fact: FunFact) -> Self {
        Self {
            kind: HitKind::FunFact,
            id: fact.id,
            matched_by: MatchedBy::detect(term, &fact.title),
            title: fact.title,
            description: fact.description,
            tags: Vec::new(),
            related_items: Vec::new(),
            href: format!("/funfacts?highlight={}", fact.id),
            anchor: Some(format!("funfact-{}", fact.id)),
        }
    }
}

/// Merge per-table results: likes and dislikes, then tags, then fun facts.
pub fn merge_hits(
    term: &str,
    likes: Vec<LikeWithTags>,
    tags: Vec<TagWithItems>,
    fun_facts: Vec<FunFact>,
) -> Vec<SearchHit> {
    likes
        .into_iter()
        .map(|row| SearchHit::from_like(term, row))
        .chain(tags.into_iter().map(|row| SearchHit::from_tag(term, row)))
        .chain(fun_facts.into_iter().map(|fact| SearchHit::from_fun_fact(term, fact)))
        .collect()
}

/// Run the three table queries concurrently and merge them.
///
/// A blank query returns no hits without touching the store.
pub async fn run_search(store: &dyn Store, query: &str) -> StoreResult<Vec<SearchHit>> {
    let term = query.trim();
    if term.is_empty() {
        return Ok(Vec::new());
    }

    let (likes, tags, fun_facts) = tokio::try_join!(
        store.search_likes(term),
        store.search_tags(term),
        store.search_fun_facts(term),
    )?;

    tracing::debug!(
        term,
        likes = likes.len(),
        tags = tags.len(),
        fun_facts = fun_facts.len(),
        "search completed"
    );

    Ok(merge_hits(term, likes, tags, fun_facts))
}

/// Latest results published by a [`SearchSession`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Debounced search-as-you-type.
///
/// Each `input` restarts the debounce timer; the query runs once input has
/// been quiet for the whole window. Blank input clears the results at once.
/// Results whose input was superseded mid-query are never published.
pub struct SearchSession {
    input: watch::Sender<String>,
    state: watch::Receiver<SearchState>,
    task: JoinHandle<()>,
}

impl SearchSession {
    pub fn new(store: Arc<dyn Store>, debounce: Duration) -> Self {
        let (input, input_rx) = watch::channel(String::new());
        let (state_tx, state) = watch::channel(SearchState::default());
        let task = tokio::spawn(drive(store, debounce, input_rx, state_tx));
        Self { input, state, task }
    }

    /// Session using the configured `SEARCH_DEBOUNCE_MS` window.
    pub fn from_config(store: Arc<dyn Store>, config: &AppConfig) -> Self {
        Self::new(store, config.search_debounce)
    }

    pub fn input(&self, text: impl Into<String>) {
        self.input.send_replace(text.into());
    }

    pub fn results(&self) -> watch::Receiver<SearchState> {
        self.state.clone()
    }

    pub fn current(&self) -> SearchState {
        self.state.borrow().clone()
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    store: Arc<dyn Store>,
    debounce: Duration,
    mut input: watch::Receiver<String>,
    state: watch::Sender<SearchState>,
) {
    'inputs: while input.changed().await.is_ok() {
        let mut text = input.borrow_and_update().clone();

        loop {
            if text.trim().is_empty() {
                state.send_replace(SearchState::default());
                continue 'inputs;
            }
            tokio::select! {
                changed = input.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    text = input.borrow_and_update().clone();
                }
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        state.send_modify(|s| s.loading = true);
        let result = run_search(store.as_ref(), &text).await;
        if input.has_changed().unwrap_or(false) {
            continue;
        }

        let next = match result {
            Ok(hits) => SearchState {
                query: text,
                hits,
                loading: false,
                error: None,
            },
            Err(e) => {
                tracing::error!(error = %e, "search failed");
                SearchState {
                    query: text,
                    hits: Vec::new(),
                    loading: false,
                    error: Some("Search failed. Please try again.".to_string()),
                }
            }
        };
        state.send_replace(next);
    }
}
