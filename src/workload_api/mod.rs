// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The Workload API client (spec §4.E): endpoint resolution, the external
//! dial/stream seam, and the reconnecting state machine built on top of it.

pub mod client;
pub mod endpoint;
pub mod transport;

pub use client::{Snapshot, Subscription, WorkloadApiClient};
pub use endpoint::Endpoint;
pub use transport::{JwtBundleUpdateStream, WorkloadApiTransport, X509Update, X509UpdateStream};
