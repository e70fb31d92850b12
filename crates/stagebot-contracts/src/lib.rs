pub mod catalog;
pub mod events;
pub mod identity;
pub mod jobs;
