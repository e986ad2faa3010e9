//! Request Jar - capture HTTP requests into named jars and watch them live
//!
//! A jar is a capture endpoint. Anything sent to `/r/{jar}/...` is stored
//! under that jar and pushed to every open event stream for it.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod id;
pub mod model;
pub mod network;
pub mod service;
pub mod store;
pub mod subscription;

pub use error::{JarError, Result};

static_assertions::assert_impl_all!(service::JarService: Send, Sync);
static_assertions::assert_impl_all!(subscription::SubscriptionRegistry: Send, Sync, Clone);
static_assertions::assert_impl_all!(store::InMemoryJarStore: store::JarStore);
static_assertions::assert_impl_all!(store::InMemoryRequestStore: store::RequestStore);
