//! Event-vendor marketplace order core: order builder, status machine,
//! availability ledger, payment reconciliation against Paystack, and the
//! completion sweeper.

pub mod api;
pub mod error;
pub mod gateway;
pub mod models;
pub mod orders;
pub mod outbox;
pub mod payments;
pub mod schema;
pub mod store;
pub mod sweeper;
