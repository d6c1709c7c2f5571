pub mod export;
pub mod receipts;
