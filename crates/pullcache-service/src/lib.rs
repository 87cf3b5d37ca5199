//! The core of pullcache, a pull-through cache for remote binary resources.
//!
//! A client asks for a resource by its source URL; the service either serves
//! a previously fetched local copy or streams the resource from its origin,
//! persists it, and serves it. See the [`caching`] module for the engine and
//! its guarantees.

pub mod caching;
pub mod config;
pub mod download;
pub mod logging;
mod service;

pub use self::service::PullService;
