//! Keeping view state in line with the server.
//!
//! Views are fed by authoritative fetches. Realtime events only say that
//! something changed; the view re-fetches rather than applying the payload.
//! Local mutations are shown optimistically and then confirmed, reverted, or
//! overwritten by the next fetch.

mod optimistic;
mod sequence;
mod view;

pub use optimistic::{MutationError, Optimistic, OptimisticMap, PendingChange};
pub use sequence::{Sequencer, Ticket};
pub use view::{refetch_on_notify, Outcome, ReconciledView, ViewState};
