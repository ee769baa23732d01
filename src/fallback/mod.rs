//! Data handles that degrade from live network to cache to bundled data.
//!
//! Inspired by TanStack Query and offline-first dashboards: every widget owns a
//! [`FallbackData`] for its data type, and always has something to render.

mod data;
mod state;

pub use data::{FallbackContext, FallbackData};
pub use state::{DataSource, FallbackOptions, FallbackState, Transform};
