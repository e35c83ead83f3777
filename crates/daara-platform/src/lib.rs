pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    AssignSlotsRequest, BatchItem, CategoryQuery, CreateSlotsRequest, DeclareSettlementRequest,
    ErrorResponse, IssueDuesRequest, ItemsResponse, ObligationQuery, PendingQuery,
    PortfolioQuery, ReassignRequest, RejectSettlementRequest, ReviseAmountRequest,
    SETTLEMENTS_CONFIRMED_CHANNEL, SETTLEMENTS_REJECTED_CHANNEL, SettlementResolvedEvent,
};
pub use db::{bootstrap_schema, connect_database};
pub use pg_store::{PgEventStore, PgLedgerStore};
pub use redis_bus::RedisBus;
