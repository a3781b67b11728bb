//! Signup Bot — conversational registration for messaging channels.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod profile;
pub mod session;
pub mod store;
pub mod validation;
