//! Views that follow the server: chat feeds, dashboard counts and listing
//! interest.
//!
//! Each consumer subscribes on open and unsubscribes on close or drop.
//! Responses that arrive after close are ignored.

mod chat;
mod dashboard;
mod interest;

pub use chat::ChatFeed;
pub use dashboard::DashboardCounts;
pub use interest::InterestBoard;
