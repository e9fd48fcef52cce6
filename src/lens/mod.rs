//! Lens module
//!
//! This module provides the high-level "lens" abstractions of the cache. Each
//! lens owns one concern and is usable on its own; `WhoisLens` composes the
//! lower ones into the read-through cache and `BanLedger` sits on top of it.
//!
//! | Lens | Purpose |
//! |------|---------|
//! | `record` | `NetworkRecord` codec and store reads |
//! | `cidr` | `CidrIndex`, the in-memory network index |
//! | `rdap` | `WhoisResolver` trait and the HTTP `RdapResolver` |
//! | `whois` | `WhoisLens`, lookup and refresh coordination |
//! | `ban` | `BanLedger`, ban/unban bookkeeping |
//!
//! # Usage
//!
//! ```rust,ignore
//! use cidrcache::lens::cidr::CidrIndex;
//! use cidrcache::lens::rdap::{RdapResolver, WhoisResolver};
//! use cidrcache::lens::whois::{Resolution, WhoisLens};
//! use cidrcache::lens::ban::BanLedger;
//! ```

pub mod ban;
pub mod cidr;
pub mod rdap;
pub mod record;
pub mod whois;
