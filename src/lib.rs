//! mail-intake — turns inbound email into records on a per-tenant store.

pub mod admin;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod mailbox;
pub mod onboarding;
pub mod poller;
pub mod records;
pub mod store;
pub mod tenants;

#[cfg(test)]
mod test_support;
