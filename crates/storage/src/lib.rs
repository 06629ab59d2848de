//! In-memory persistence for the dispatch service.
//!
//! [`TaskStore`] keeps every submitted task with its owner and, once the
//! engine resolves it, its result. [`ResultRecorder`] is the event-bus
//! subscriber that writes those results; [`UserRegistry`] mints stable user
//! ids for API tokens.

pub mod recorder;
pub mod store;
pub mod users;

pub use recorder::ResultRecorder;
pub use store::{TaskData, TaskStore};
pub use users::UserRegistry;
