//! Ratewarden - In-Process Rate Limiting
//!
//! This crate implements a per-process, fixed-window rate limiter keyed by
//! client identity, plus the HTTP glue that turns an exhausted quota into a
//! `429 Too Many Requests` response.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
