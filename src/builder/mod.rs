pub mod dispatcher;
pub mod history;
pub mod session;
pub mod state;

pub use dispatcher::{ActionDispatcher, BulkOutcome, ItemOutcome};
pub use history::{HistoryEntry, MenuCommand};
pub use session::{BuilderSession, BuilderSessions};
pub use state::{BuilderState, BuilderView, SelectionScope};
