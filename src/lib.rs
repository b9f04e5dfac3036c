//! Hookcast Dispatch Library
//!
//! This library provides the core functionality for hookcast: planning,
//! deduplicating, delivering, auditing, and retrying webhook notifications
//! for application events.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod logstore;
pub mod metrics;
pub mod registry;
pub mod scheduler;

pub use config::Config;
pub use dispatch::{EventData, JobOutcome, WebhookDispatcher};
pub use registry::WebhookRegistration;
pub use scheduler::{JobContext, JobDescriptor, Scheduler};
