//! Resumable execution primitives.
//!
//! | Module      | Provides                                                        |
//! |-------------|-----------------------------------------------------------------|
//! | `store`     | `CheckpointStore` — durable `(namespace, tag) -> payload` records |
//! | `memo`      | `StageMemo` — at-most-once execution of whole stages            |
//! | `progress`  | `ItemTracker` — skip already-processed items in a loop          |
//! | `interrupt` | `InterruptGuard`, `capture_failure` — flush state on the way out |

pub mod interrupt;
pub mod memo;
pub mod progress;
pub mod store;

pub use interrupt::{INTERRUPT_EXIT_CODE, InterruptGuard, StateSaver, capture_failure};
pub use memo::{StageMemo, StageObserver, StageRecord};
pub use progress::{ItemProgress, ItemTracker};
pub use store::{CheckpointRecord, CheckpointStore, DEFAULT_NAMESPACE};
