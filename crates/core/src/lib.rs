pub mod config;
pub mod fulfillment;
pub mod loader;
pub mod metrics;
pub mod relay;
pub mod request;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    LoaderConfig, RelayBackend, RelayConfig, SanitizedConfig, ServerConfig, TelegramConfig,
};
pub use fulfillment::{
    AttemptError, AttemptOutcome, FulfillmentConfig, FulfillmentController, FulfillmentScheduler,
    SchedulerState, SchedulerStatus, StatusAlertCallback,
};
pub use loader::{
    LibrqbitBackend, LoaderError, PayloadLoader, ResolvedPayload, TorrentBackend, TorrentLoader,
    TransferProgress,
};
pub use relay::{DeliveryRef, MediaKind, RelayError, RelayUploader, TelegramUploader};
pub use request::{
    DeliveryRecord, NewRequest, Request, RequestStatus, RequestStore, Requester,
    SqliteRequestStore, StoreError, DEFAULT_PRIORITY,
};
