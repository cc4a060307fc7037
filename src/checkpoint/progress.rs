//! Item-level progress for loops over work items.
//!
//! The tracker hands out items one at a time. Asking for the next item is what
//! marks the previous one as done: the processed list and the caller's
//! accumulator are persisted before the next item is returned, so a crash
//! loses at most the item that was in flight.
//!
//! ```ignore
//! let mut acc = GenerateProgress::default();
//! let mut tracker = ItemTracker::begin(&store, ns, "generate", items, &mut acc)?;
//! while let Some(item) = tracker.next(&acc)? {
//!     process(&item, &mut acc).await?;
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::store::{CheckpointStore, StoreResult};

/// Persisted progress for one tracking tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemProgress<T, A> {
    pub processed: Vec<T>,
    pub extra_state: A,
}

pub struct ItemTracker<'s, T> {
    store: &'s CheckpointStore,
    namespace: String,
    tag: String,
    pending: std::vec::IntoIter<T>,
    processed: Vec<T>,
    in_flight: Option<T>,
}

impl<'s, T> ItemTracker<'s, T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned,
{
    /// Restore progress for `(namespace, tag)` and prepare to yield the rest of `items`.
    ///
    /// When a snapshot exists, `extra` is overwritten with the restored
    /// accumulator so the caller continues from the persisted values.
    /// Already-processed items are matched by equality, not position.
    pub fn begin<A>(
        store: &'s CheckpointStore,
        namespace: &str,
        tag: &str,
        items: Vec<T>,
        extra: &mut A,
    ) -> StoreResult<Self>
    where
        A: Serialize + DeserializeOwned,
    {
        let processed = match store.get::<ItemProgress<T, A>>(namespace, tag) {
            Ok(Some(saved)) => {
                *extra = saved.extra_state;
                saved.processed
            }
            Ok(None) => Vec::new(),
            Err(e) if e.is_corrupt() => {
                warn!(namespace, tag, error = %e, "Ignoring unreadable progress record, starting over");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let pending: Vec<T> = items
            .into_iter()
            .filter(|item| !processed.contains(item))
            .collect();

        if !processed.is_empty() {
            info!(
                namespace,
                tag,
                done = processed.len(),
                remaining = pending.len(),
                "Resuming item loop"
            );
        }

        Ok(Self {
            store,
            namespace: namespace.to_string(),
            tag: tag.to_string(),
            pending: pending.into_iter(),
            processed,
            in_flight: None,
        })
    }

    /// Mark the previously yielded item as done, persist, and yield the next one.
    ///
    /// `extra` is the accumulator as it stands after the previous item.
    #[allow(clippy::should_implement_trait)]
    pub fn next<A: Serialize>(&mut self, extra: &A) -> StoreResult<Option<T>> {
        if let Some(done) = self.in_flight.take() {
            self.processed.push(done);
            let snapshot = ItemProgressRef {
                processed: &self.processed,
                extra_state: extra,
            };
            self.store.put(&self.namespace, &self.tag, &snapshot)?;
            debug!(
                namespace = %self.namespace,
                tag = %self.tag,
                done = self.processed.len(),
                "Item checkpointed"
            );
        }

        let next = self.pending.next();
        self.in_flight = next.clone();
        Ok(next)
    }

    /// Items completed so far, including those restored from a previous run.
    pub fn processed(&self) -> &[T] {
        &self.processed
    }

    /// Items not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

/// Borrowing twin of [`ItemProgress`] so saving does not clone the lists.
#[derive(Serialize)]
struct ItemProgressRef<'a, T, A> {
    processed: &'a [T],
    extra_state: &'a A,
}
