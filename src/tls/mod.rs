// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The SPIFFE-aware TLS adapter (spec §4.G): custom `rustls` verifiers plus
//! the six configuration presets built from them.

mod policy;
mod trace;
mod verifier;

pub use policy::{
    hook_client_cert, hook_server_cert, mtls_client, mtls_server, mtls_web_client, mtls_web_server, tls_client,
    tls_server, ServerIdentity,
};
pub use trace::{Trace, TraceToken};
pub use verifier::{BundleLookup, SpiffeClientCertVerifier, SpiffeServerCertVerifier};
