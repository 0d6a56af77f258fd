use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use horizon_core::{
    DocumentStore, Identity, IdentityProvider, Query, SortDirection, StoreError, Transaction,
    WriteOp,
};
use horizon_shared::{BookingId, BookingStatus};
use horizon_store::app_config::BookingRules;
use horizon_store::TtlCache;

use crate::error::BookingError;
use crate::models::{AnalyticsCounters, Booking, BookingDraft, TripIndexEntry};
use crate::paths;

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub max_commit_attempts: u32,
    pub backoff_base: Duration,
    pub cache_ttl: Duration,
    pub subscription_throttle: Duration,
    pub page_size: usize,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
            backoff_base: Duration::from_millis(50),
            cache_ttl: Duration::from_secs(300),
            subscription_throttle: Duration::from_millis(1000),
            page_size: 50,
        }
    }
}

impl From<&BookingRules> for BookingConfig {
    fn from(rules: &BookingRules) -> Self {
        Self {
            max_commit_attempts: rules.max_commit_attempts.max(1),
            backoff_base: Duration::from_millis(rules.backoff_base_ms),
            cache_ttl: Duration::from_secs(rules.cache_ttl_seconds),
            subscription_throttle: Duration::from_millis(rules.subscription_throttle_ms),
            page_size: rules.page_size,
        }
    }
}

/// Commits bookings atomically: the Booking document, its per-user trip
/// index entry, and the shared analytics counters all become visible
/// together or not at all. Constructed explicitly with its store handle and
/// identity provider; cheap to clone, and `with_identity` rebinds the
/// identity source for a request scope.
#[derive(Clone)]
pub struct BookingCoordinator {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: Arc<TtlCache<String, Vec<Booking>>>,
    config: BookingConfig,
}

impl BookingCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: BookingConfig,
    ) -> Self {
        let cache = Arc::new(TtlCache::new(config.cache_ttl));
        Self {
            store,
            identity,
            cache,
            config,
        }
    }

    /// Same coordinator, different identity source. The cache and store are
    /// shared with the original.
    pub fn with_identity(&self, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store: self.store.clone(),
            identity,
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }

    fn require_identity(&self) -> Result<Identity, BookingError> {
        self.identity.current().ok_or(BookingError::Unauthenticated)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis().max(1) as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(6));
        let jitter = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(exp + jitter)
    }

    /// Atomically persist a new booking.
    ///
    /// All three writes (booking, trip index entry, counter increments) are
    /// staged in one transaction; the store's atomic-increment primitive
    /// means no read is needed, so the commit is writes-only. Transient
    /// conflicts retry the whole transaction with jittered backoff up to
    /// the configured attempt budget, then surface as `CommitFailed`.
    /// There is no partial, non-atomic fallback path.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<BookingId, BookingError> {
        let caller = self.require_identity()?;
        if let Some(claimed) = &draft.user_id {
            if claimed != &caller.user_id {
                warn!(
                    claimed = %claimed,
                    caller = %caller.user_id,
                    "rejecting booking draft claiming another owner"
                );
                return Err(BookingError::IdentityMismatch {
                    claimed: claimed.clone(),
                    caller: caller.user_id.clone(),
                });
            }
        }
        draft.validate().map_err(BookingError::InvalidDraft)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let id = BookingId::generate(draft.booking_type);
            let booking = Booking::from_draft(&draft, &caller, id.clone());

            match self.commit_booking(&booking).await {
                Ok(()) => {
                    self.cache.invalidate(&caller.user_id);
                    info!(booking_id = %id, user_id = %caller.user_id, "booking committed");
                    return Ok(id);
                }
                // A contested id is vanishingly rare; regenerate and go again.
                Err(StoreError::AlreadyExists(path)) => {
                    if attempt >= self.config.max_commit_attempts {
                        error!(booking_id = %path, "id collisions exhausted commit attempts");
                        return Err(BookingError::CommitFailed { attempts: attempt });
                    }
                    debug!(booking_id = %path, "booking id collision, regenerating");
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.max_commit_attempts {
                        error!(error = %e, attempts = attempt, "booking commit retries exhausted");
                        return Err(BookingError::CommitFailed { attempts: attempt });
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "transient commit failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(error = %e, "booking commit failed");
                    return Err(BookingError::Store(e));
                }
            }
        }
    }

    async fn commit_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut tx = Transaction::new(self.store.as_ref());

        tx.stage(
            WriteOp::create(paths::booking(&booking.id), booking)?
                .server_timestamp("created_at")
                .server_timestamp("updated_at"),
        );

        let index = TripIndexEntry::project(booking);
        tx.stage(
            WriteOp::create(paths::trip_index(&booking.id), &index)?
                .server_timestamp("created_at"),
        );

        let type_key = booking.booking_type.counter_key();
        tx.stage(
            WriteOp::merge(paths::counters())
                .increment("total_revenue", booking.payment.amount)
                .increment("total_bookings", 1)
                .increment(format!("bookings_by_type.{}", type_key), 1)
                .increment(format!("revenue_by_type.{}", type_key), booking.payment.amount)
                .server_timestamp("updated_at"),
        );

        tx.commit().await
    }

    /// Transition a booking's status, updating the denormalized trip index
    /// entry in the same atomic commit so the two can never diverge.
    pub async fn update_booking_status(
        &self,
        id: &BookingId,
        new_status: BookingStatus,
    ) -> Result<(), BookingError> {
        let caller = self.require_identity()?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut tx = Transaction::new(self.store.as_ref());
            let doc = tx
                .get(&paths::booking(id))
                .await?
                .ok_or_else(|| BookingError::NotFound(id.clone()))?;
            let booking: Booking = doc.parse()?;

            if booking.user_id != caller.user_id {
                return Err(BookingError::IdentityMismatch {
                    claimed: booking.user_id,
                    caller: caller.user_id,
                });
            }
            if !booking.status.can_transition_to(new_status) {
                return Err(BookingError::InvalidTransition {
                    from: booking.status,
                    to: new_status,
                });
            }

            tx.stage(
                WriteOp::update(paths::booking(id))
                    .field("status", new_status)?
                    .server_timestamp("updated_at"),
            );
            tx.stage(
                WriteOp::update(paths::trip_index(id))
                    .field("status", new_status)?
                    .server_timestamp("updated_at"),
            );

            match tx.commit().await {
                Ok(()) => {
                    self.cache.invalidate(&caller.user_id);
                    info!(booking_id = %id, status = %new_status, "booking status updated");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.max_commit_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(error = %e, attempt, "transient status update failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(BookingError::CommitFailed { attempts: attempt });
                }
                Err(e) => return Err(BookingError::Store(e)),
            }
        }
    }

    /// Attach the rendered voucher document URL, the one post-hoc field a
    /// committed booking accepts besides its status.
    pub async fn attach_voucher_url(
        &self,
        id: &BookingId,
        url: &str,
    ) -> Result<(), BookingError> {
        let caller = self.require_identity()?;
        let doc = self
            .store
            .get(&paths::booking(id))
            .await?
            .ok_or_else(|| BookingError::NotFound(id.clone()))?;
        let booking: Booking = doc.parse()?;
        if booking.user_id != caller.user_id {
            return Err(BookingError::IdentityMismatch {
                claimed: booking.user_id,
                caller: caller.user_id,
            });
        }

        self.store
            .commit(vec![WriteOp::update(paths::booking(id))
                .field("voucher_url", url)?
                .server_timestamp("updated_at")])
            .await?;
        self.cache.invalidate(&caller.user_id);
        Ok(())
    }

    /// Owner-checked lookup. Absence (or another user's booking) is an
    /// empty result, not an error.
    pub async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>, BookingError> {
        let caller = self.require_identity()?;
        let Some(doc) = self.store.get(&paths::booking(id)).await? else {
            return Ok(None);
        };
        let booking: Booking = doc.parse()?;
        if booking.user_id != caller.user_id {
            return Ok(None);
        }
        Ok(Some(booking))
    }

    /// The caller's bookings, newest first, served through the TTL cache.
    /// The cache is invalidated on the caller's own commits; staleness for
    /// other observers is bounded by the TTL.
    pub async fn get_user_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        let caller = self.require_identity()?;
        if let Some(bookings) = self.cache.get(&caller.user_id) {
            debug!(user_id = %caller.user_id, "bookings served from cache");
            return Ok(bookings);
        }
        let bookings =
            fetch_page(self.store.as_ref(), &caller.user_id, self.config.page_size).await?;
        self.cache.insert(caller.user_id.clone(), bookings.clone());
        Ok(bookings)
    }

    /// Read of the shared aggregate counters. Role enforcement lives with
    /// the caller (the admin API surface).
    pub async fn analytics_summary(&self) -> Result<AnalyticsCounters, BookingError> {
        match self.store.get(&paths::counters()).await? {
            Some(doc) => Ok(doc.parse()?),
            None => Ok(AnalyticsCounters::default()),
        }
    }

    /// Live query over the caller's bookings.
    ///
    /// Delivers the current page immediately, then re-queries on store
    /// changes, collapsing bursts so at most one delivery happens per
    /// throttle interval; the trailing delivery always reflects the final
    /// state. Dropping the returned handle unsubscribes.
    pub fn subscribe_to_user_bookings<F>(&self, callback: F) -> Result<Subscription, BookingError>
    where
        F: Fn(Vec<Booking>) + Send + 'static,
    {
        let caller = self.require_identity()?;
        let store = self.store.clone();
        let throttle = self.config.subscription_throttle;
        let page_size = self.config.page_size;
        let mut rx = store.changes();

        let handle = tokio::spawn(async move {
            let user_id = caller.user_id;
            let mut last_delivery = tokio::time::Instant::now();
            match fetch_page(store.as_ref(), &user_id, page_size).await {
                Ok(bookings) => callback(bookings),
                Err(e) => warn!(error = %e, "initial subscription query failed"),
            }

            loop {
                // Block until something in the bookings collection moves.
                match rx.recv().await {
                    Ok(event) if event.collection == paths::BOOKINGS => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "subscription lagged behind change feed");
                    }
                    Err(RecvError::Closed) => break,
                }

                // Trailing-edge throttle: wait out the rest of the interval
                // since the last delivery, then drain whatever else arrived
                // so a burst collapses into one delivery of the final state.
                let elapsed = last_delivery.elapsed();
                if elapsed < throttle {
                    tokio::time::sleep(throttle - elapsed).await;
                }
                loop {
                    match rx.try_recv() {
                        Ok(_) => continue,
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(TryRecvError::Closed) => break,
                    }
                }

                match fetch_page(store.as_ref(), &user_id, page_size).await {
                    Ok(bookings) => callback(bookings),
                    Err(e) => warn!(error = %e, "subscription re-query failed"),
                }
                last_delivery = tokio::time::Instant::now();
            }
        });

        Ok(Subscription { handle })
    }
}

async fn fetch_page(
    store: &dyn DocumentStore,
    user_id: &str,
    page_size: usize,
) -> Result<Vec<Booking>, StoreError> {
    let query = Query::collection(paths::BOOKINGS)
        .filter_eq("user_id", user_id)
        .order_by("created_at", SortDirection::Descending)
        .limit(page_size);
    let docs = store.query(&query).await?;
    docs.iter().map(|doc| doc.parse()).collect()
}

/// Handle to a live bookings subscription. Unsubscribes explicitly or when
/// dropped.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
