pub mod auth;
pub mod events;
pub mod session;

pub use auth::AuthorizedTags;
pub use events::Event;
pub use session::{ConnectorRecord, ConnectorStatus, CpSession};
