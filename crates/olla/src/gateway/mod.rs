//! External collaborators: the row store, outbound notifications and payouts.

pub mod disbursement;
pub mod memory;
pub mod notify;
pub mod postgrest;
mod retry;
pub mod seed;
pub mod store;

pub use disbursement::{
    BonusReceipt, BonusRequest, DisbursementError, HttpDisbursement, LedgerDisbursement,
    PaymentDisbursement,
};
pub use memory::{MemoryStore, ProcedureCall, REVEAL_CONTACT_PROCEDURE};
pub use notify::{HttpNotifier, NotificationError, Notifier};
pub use postgrest::PostgrestStore;
pub use seed::SeedError;
pub use store::{decode_row, encode_row, Filter, Row, StoreError, StoreGateway, Table};
