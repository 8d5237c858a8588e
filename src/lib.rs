pub mod buffer;
pub mod cache;
pub mod calendar;
pub mod cli;
pub mod clock;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod location;
pub mod model;
pub mod oauth;
pub mod session;
pub mod shutdown;
pub mod signal;
pub mod storage;
pub mod ui;
pub mod view;
pub mod weather;
