//! # Loyalty server
//! This crate hosts the loyalty engine's long-running parts. It is responsible for:
//! * Polling the accrual service for every unfinished order, and crediting the points it awards
//!   (see [accrual_worker](accrual_worker/index.html)).
//! * Serving a health probe over HTTP.
//! * Shutting everything down in order when the process receives Ctrl-C.
//!
//! ## Configuration
//! The server is configured via environment variables and command-line flags. See [config](config/index.html) for
//! more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.

pub mod accrual_worker;
pub mod cli;
pub mod config;
pub mod errors;
pub mod routes;
pub mod server;

#[cfg(test)]
mod test;
