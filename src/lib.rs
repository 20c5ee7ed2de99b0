// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! SPIFFE identity plane: Workload API client, X.509/JWT-SVID and trust
//! bundle model, and a `rustls` TLS adapter built from them.
//!
//! The crate has no `main.rs` — it is a library consumed by services that
//! want SPIFFE-based mTLS without hand-wiring `rustls` verifiers themselves.
//! See `demos/` for runnable illustrations (`basic_mtls`, `workload_api`).

#![forbid(rust_2018_idioms)]
#![forbid(missing_docs, unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::nursery,
    clippy::dbg_macro,
    clippy::todo
)]

pub mod authorizer;
pub mod bundle;
pub mod config;
pub mod error;
#[cfg(feature = "federation")]
pub mod federation;
pub mod source;
pub mod spiffe_id;
pub mod svid;
pub mod tls;
pub mod verifier;
pub mod workload_api;

pub use authorizer::Authorizer;
pub use bundle::{Bundle, BundleSet, JwtBundle, X509Bundle};
pub use error::{Result, SpiffeError};
pub use spiffe_id::{SpiffeId, TrustDomain};
pub use svid::{JwtSvid, X509Svid};
pub use workload_api::{Endpoint, WorkloadApiClient};
