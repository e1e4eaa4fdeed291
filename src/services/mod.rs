pub mod chat;
pub mod read_receipts;

pub use chat::ChatService;
pub use read_receipts::ReadReceiptCoordinator;
