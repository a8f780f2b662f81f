//! nudge-dispatch: consent-gated outreach sends with quota and cooldown.

pub mod auth;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod limits;
pub mod mail;
pub mod observer;
pub mod service;
pub mod store;
