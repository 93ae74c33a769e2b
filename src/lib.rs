//! Automated daily short-video pipeline: content rotation, script, narration,
//! video assembly, publishing and notifications.

pub mod args;
pub mod calendar;
pub mod config;
pub mod error;
pub mod history;
pub mod media;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod script;
pub mod store;
pub mod tts;
pub mod utils;
