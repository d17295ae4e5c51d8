pub mod ochiai;
mod summarizer;

pub use summarizer::{GeneratedSummary, Summarizer, SummaryBackend};
