mod events;
mod ledger;

pub use events::InMemoryEventStore;
pub use ledger::InMemoryLedgerStore;
