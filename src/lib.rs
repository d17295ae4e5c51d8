//! RSS reader that fetches and filters feeds, summarizes new papers with an
//! LLM, mails a daily digest and serves a small JSON/HTML-form API.

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod logging;
pub mod mail;
pub mod models;
pub mod scheduler;
pub mod web;

pub use config::Config;
pub use error::{AppError, Result};
