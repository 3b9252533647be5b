mod changes;
mod error;
mod ignore_rules;
mod live_watcher;
mod outcome;
mod signals;
mod tracked;

pub use changes::{ChangeWatcher, ObservedChange};
pub use error::WatchError;
pub use ignore_rules::IgnoreMatcher;
pub use live_watcher::{LiveWatcher, WatchNotice, WatcherConfig};
pub use outcome::derive_outcome;
pub use signals::SignalEnricher;
pub use tracked::{SessionKey, TrackedSession};
