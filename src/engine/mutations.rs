use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_availability, validate_span};
use super::{Engine, EngineError, SharedItemState, WalCommand};

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        id: Ulid,
        name: String,
        email: String,
    ) -> Result<User, EngineError> {
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::UserCreated {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        self.wal_append(&event).await?;
        let user = User { id, name, email };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    pub async fn update_user(
        &self,
        id: Ulid,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<User, EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        if let Some(ref e) = email
            && e.len() > MAX_EMAIL_LEN
        {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        self.user_exists(&id)?;

        let event = Event::UserUpdated {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        self.wal_append(&event).await?;
        let mut user = self.users.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        if let Some(n) = name {
            user.name = n;
        }
        if let Some(e) = email {
            user.email = e;
        }
        Ok(user.clone())
    }

    /// Remove a user record. Refused while the user still owns items — the
    /// engine never orphans item state.
    pub async fn remove_user(&self, id: Ulid) -> Result<(), EngineError> {
        self.user_exists(&id)?;
        if let Some(owned) = self.owner_items.get(&id)
            && !owned.is_empty()
        {
            return Err(EngineError::BadRequest(format!(
                "user {id} still owns {} items",
                owned.len()
            )));
        }

        let event = Event::UserRemoved { id };
        self.wal_append(&event).await?;
        self.users.remove(&id);
        Ok(())
    }

    // ── Items ────────────────────────────────────────────────

    pub async fn create_item(
        &self,
        id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    ) -> Result<ItemInfo, EngineError> {
        if self.items.len() >= MAX_ITEMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("item name too long"));
        }
        if description.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("item description too long"));
        }
        self.user_exists(&owner_id)?;
        if self.items.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ItemCreated {
            id,
            owner_id,
            name: name.clone(),
            description: description.clone(),
            available,
        };
        self.wal_append(&event).await?;
        let item = ItemState::new(id, owner_id, name, description, available);
        let info = ItemInfo {
            id,
            owner_id,
            name: item.name.clone(),
            description: item.description.clone(),
            available,
            summary: None,
        };
        self.items.insert(id, Arc::new(RwLock::new(item)));
        self.owner_items.entry(owner_id).or_default().push(id);
        self.notify.send(id, &event);
        Ok(info)
    }

    /// Patch-style item update: only the owner may change the fields, and
    /// absent fields are left untouched.
    pub async fn update_item(
        &self,
        id: Ulid,
        actor: Ulid,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    ) -> Result<ItemInfo, EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("item name too long"));
        }
        if let Some(ref d) = description
            && d.len() > MAX_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("item description too long"));
        }
        let item = self.get_item(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = item.write().await;
        if guard.owner_id != actor {
            return Err(EngineError::Forbidden(actor));
        }

        let event = Event::ItemUpdated {
            id,
            name,
            description,
            available,
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(ItemInfo {
            id,
            owner_id: guard.owner_id,
            name: guard.name.clone(),
            description: guard.description.clone(),
            available: guard.available,
            summary: None,
        })
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a booking request. The availability check runs under the
    /// item's write lock, so a conflicting request racing with this one
    /// observes either our persisted booking or none — never a torn state.
    /// A failed request persists nothing.
    pub async fn request_booking(
        &self,
        id: Ulid,
        item_id: Ulid,
        booker_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        self.user_exists(&booker_id)?;
        let span = validate_span(start, end)?;

        // Booker-scoped lookup: the booker's own items are invisible here,
        // so self-booking surfaces as NotFound rather than Forbidden.
        let item = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let mut guard = item.write().await;
        if guard.owner_id == booker_id {
            return Err(EngineError::NotFound(item_id));
        }
        if !guard.available {
            return Err(EngineError::BadRequest("item is not available".into()));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }
        if self.booking_to_item.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        check_availability(&guard, &span)?;

        let event = Event::BookingRequested {
            id,
            item_id,
            booker_id,
            span,
        };
        self.persist_and_apply(item_id, &mut guard, &event).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        Ok(BookingInfo::from_booking(booking, item_id))
    }

    /// Drive the one legal transition out of WAITING. The load, the status
    /// check, the ownership check, and the write all happen under one item
    /// write lock — the compare-and-set that makes a second concurrent
    /// decision fail instead of double-committing.
    pub async fn decide_booking(
        &self,
        booking_id: Ulid,
        actor: Ulid,
        approved: bool,
    ) -> Result<BookingInfo, EngineError> {
        let (item_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.booker_id == actor {
            // A booker must not learn they could have approved their own
            // request: hide the booking entirely.
            return Err(EngineError::NotFound(booking_id));
        }
        if booking.status != Status::Waiting {
            return Err(EngineError::BadRequest(format!(
                "booking is already {}",
                booking.status
            )));
        }
        if guard.owner_id != actor {
            return Err(EngineError::Forbidden(actor));
        }

        let event = Event::BookingDecided {
            id: booking_id,
            item_id,
            approved,
        };
        self.persist_and_apply(item_id, &mut guard, &event).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok(BookingInfo::from_booking(booking, item_id))
    }

    // ── Comments ─────────────────────────────────────────────

    /// Add a comment to an item. Only a user whose APPROVED booking of the
    /// item has already ended may comment.
    pub async fn add_comment(
        &self,
        id: Ulid,
        item_id: Ulid,
        author_id: Ulid,
        text: String,
        now: Ms,
    ) -> Result<CommentInfo, EngineError> {
        self.user_exists(&author_id)?;
        if text.trim().is_empty() {
            return Err(EngineError::BadRequest("comment text is empty".into()));
        }
        if text.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("comment too long"));
        }

        let item = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let mut guard = item.write().await;
        if guard.comments.len() >= MAX_COMMENTS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many comments on item"));
        }

        let has_rented = guard
            .bookings
            .iter()
            .any(|b| b.is_approved() && b.booker_id == author_id && b.span.end < now);
        if !has_rented {
            return Err(EngineError::BadRequest(format!(
                "user {author_id} has not rented item {item_id}"
            )));
        }

        let event = Event::CommentAdded {
            id,
            item_id,
            author_id,
            text: text.clone(),
            created_at: now,
        };
        self.persist_and_apply(item_id, &mut guard, &event).await?;
        Ok(CommentInfo {
            id,
            item_id,
            author_id,
            text,
            created_at: now,
        })
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. A decided booking compacts to its
    /// request event plus the decision that sealed it.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            let user = entry.value();
            events.push(Event::UserCreated {
                id: user.id,
                name: user.name.clone(),
                email: user.email.clone(),
            });
        }

        let items: Vec<SharedItemState> = self.items.iter().map(|e| e.value().clone()).collect();
        for item in items {
            let guard = item.try_read().expect("compact: uncontended read");

            events.push(Event::ItemCreated {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                description: guard.description.clone(),
                available: guard.available,
            });

            for booking in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: booking.id,
                    item_id: guard.id,
                    booker_id: booking.booker_id,
                    span: booking.span,
                });
                match booking.status {
                    Status::Waiting => {}
                    Status::Approved => events.push(Event::BookingDecided {
                        id: booking.id,
                        item_id: guard.id,
                        approved: true,
                    }),
                    Status::Rejected => events.push(Event::BookingDecided {
                        id: booking.id,
                        item_id: guard.id,
                        approved: false,
                    }),
                }
            }

            for comment in &guard.comments {
                events.push(Event::CommentAdded {
                    id: comment.id,
                    item_id: guard.id,
                    author_id: comment.author_id,
                    text: comment.text.clone(),
                    created_at: comment.created_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
