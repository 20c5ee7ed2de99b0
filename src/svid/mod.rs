// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! X.509-SVID and JWT-SVID parsing (spec §3, §4.C).

pub mod jwt;
pub mod x509;

pub use jwt::JwtSvid;
pub use x509::X509Svid;
