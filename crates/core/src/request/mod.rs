//! Request tracking: data model and durable status store.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteRequestStore;
pub use store::{NewRequest, RequestStore, StoreError};
pub use types::{DeliveryRecord, Request, RequestStatus, Requester, DEFAULT_PRIORITY};
