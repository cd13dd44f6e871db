mod client;
mod properties;
mod schema;

pub use client::NotionTracker;
pub use schema::{NotionSchema, StatusNames};
