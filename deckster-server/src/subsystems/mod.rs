pub mod file_rag;
pub mod generate;
pub mod ledger;
