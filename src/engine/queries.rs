use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::aggregate::summarize;
use super::classify::{sort_newest_first, BookingState, Page};
use super::{Engine, EngineError};

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: Ulid) -> Result<User, EngineError> {
        self.require_user(&id)
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    // ── Bookings ─────────────────────────────────────────────

    /// A booking is visible to its booker and to the item's owner; anyone
    /// else gets NotFound rather than Forbidden.
    pub async fn get_booking(&self, booking_id: Ulid, actor: Ulid) -> Result<BookingInfo, EngineError> {
        self.user_exists(&actor)?;
        let item_id = self
            .get_item_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let item = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = item.read().await;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.booker_id != actor && guard.owner_id != actor {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(BookingInfo::from_booking(booking, item_id))
    }

    /// List bookings visible to `actor`, either the ones they made
    /// (`as_booker`) or the ones against their items, filtered by the
    /// requested state at `now`, newest window first, paginated.
    pub async fn list_bookings(
        &self,
        actor: Ulid,
        state_raw: &str,
        as_booker: bool,
        page: Page,
        now: Ms,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        self.user_exists(&actor)?;
        let state = BookingState::parse(state_raw)?;

        let mut found: Vec<BookingInfo> = Vec::new();
        if as_booker {
            // Snapshot the Arcs first — never hold a map shard across an await
            let items: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
            for item in items {
                let guard = item.read().await;
                found.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| b.booker_id == actor && state.matches(b, now))
                        .map(|b| BookingInfo::from_booking(b, guard.id)),
                );
            }
        } else {
            let owned: Vec<Ulid> = self
                .owner_items
                .get(&actor)
                .map(|e| e.value().clone())
                .unwrap_or_default();
            for item_id in owned {
                let Some(item) = self.get_item(&item_id) else {
                    continue;
                };
                let guard = item.read().await;
                found.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| state.matches(b, now))
                        .map(|b| BookingInfo::from_booking(b, guard.id)),
                );
            }
        }

        sort_newest_first(&mut found);
        Ok(page.slice(found))
    }

    // ── Per-item summaries ───────────────────────────────────

    /// Bulk summary computation: every requested item is answered from one
    /// call, with a single lock acquisition and a single sweep over its
    /// bookings — never a lookup per booking or a repeated global scan.
    /// Unknown ids summarize like items without approved bookings.
    pub async fn summarize_items(
        &self,
        item_ids: &[Ulid],
        now: Ms,
    ) -> Result<HashMap<Ulid, BookingSummary>, EngineError> {
        if item_ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many item IDs"));
        }
        let mut summaries = HashMap::with_capacity(item_ids.len());
        for &item_id in item_ids {
            if summaries.contains_key(&item_id) {
                continue;
            }
            let summary = match self.get_item(&item_id) {
                Some(item) => {
                    let guard = item.read().await;
                    summarize(&guard.bookings, now)
                }
                None => BookingSummary::default(),
            };
            summaries.insert(item_id, summary);
        }
        Ok(summaries)
    }

    // ── Items ────────────────────────────────────────────────

    /// Item detail. The booking summary is owner-only: other callers see
    /// the plain record with no booking state at all.
    pub async fn get_item_info(
        &self,
        item_id: Ulid,
        actor: Ulid,
        now: Ms,
    ) -> Result<ItemInfo, EngineError> {
        self.user_exists(&actor)?;
        let item = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = item.read().await;
        let summary = if guard.owner_id == actor {
            Some(summarize(&guard.bookings, now))
        } else {
            None
        };
        Ok(ItemInfo {
            id: guard.id,
            owner_id: guard.owner_id,
            name: guard.name.clone(),
            description: guard.description.clone(),
            available: guard.available,
            summary,
        })
    }

    /// All items owned by `owner`, each decorated with its booking summary.
    /// The page is cut on the id-ordered item list first, then summaries are
    /// computed for the page in one bulk pass.
    pub async fn list_items_for_owner(
        &self,
        owner: Ulid,
        page: Page,
        now: Ms,
    ) -> Result<Vec<ItemInfo>, EngineError> {
        self.user_exists(&owner)?;
        let mut owned: Vec<Ulid> = self
            .owner_items
            .get(&owner)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        owned.sort();
        let page_ids = page.slice(owned);

        let mut infos = Vec::with_capacity(page_ids.len());
        for item_id in page_ids {
            let Some(item) = self.get_item(&item_id) else {
                continue;
            };
            let guard = item.read().await;
            infos.push(ItemInfo {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                description: guard.description.clone(),
                available: guard.available,
                summary: Some(summarize(&guard.bookings, now)),
            });
        }
        Ok(infos)
    }

    /// Text search over available items. Search results are deliberately
    /// blind to booking state — no summaries, whoever asks.
    pub async fn search_items(
        &self,
        actor: Ulid,
        text: &str,
        page: Page,
    ) -> Result<Vec<ItemInfo>, EngineError> {
        self.user_exists(&actor)?;
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let items: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
        for item in items {
            let guard = item.read().await;
            if !guard.available {
                continue;
            }
            if guard.name.to_lowercase().contains(&needle)
                || guard.description.to_lowercase().contains(&needle)
            {
                found.push(ItemInfo {
                    id: guard.id,
                    owner_id: guard.owner_id,
                    name: guard.name.clone(),
                    description: guard.description.clone(),
                    available: guard.available,
                    summary: None,
                });
            }
        }
        found.sort_by_key(|i| i.id);
        Ok(page.slice(found))
    }

    // ── Comments ─────────────────────────────────────────────

    pub async fn list_comments(&self, item_id: Ulid) -> Result<Vec<CommentInfo>, EngineError> {
        let item = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = item.read().await;
        Ok(guard
            .comments
            .iter()
            .map(|c| CommentInfo {
                id: c.id,
                item_id,
                author_id: c.author_id,
                text: c.text.clone(),
                created_at: c.created_at,
            })
            .collect())
    }
}
