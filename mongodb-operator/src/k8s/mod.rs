pub mod builders;
pub mod client;

pub use client::Outcome;
