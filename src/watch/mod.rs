//! Sandbox file watching.
//!
//! A [`WatcherRegistry`] owns at most one running [`WatchStrategy`] per
//! project. Strategies push [`ChangeEvent`]s into a bounded channel supplied
//! by the caller; the change stream transport drains it.

pub mod event;
pub mod filter;
pub mod native;
pub mod polling;
pub mod registry;
pub mod strategy;

pub use event::{ChangeAction, ChangeEvent, FileChange};
pub use filter::EventFilter;
pub use registry::{StartedWatch, WatchError, WatchId, WatcherInfo, WatcherRegistry};
pub use strategy::{select_strategy, StrategyKind, WatchHandle, WatchStrategy};
