//! Authorization gates.
//!
//! Each gate inspects the authenticated [`Identity`] and one facet of the
//! classified request, and refuses with [`GatewayError::Unauthorized`].
//! Source and referer restrictions apply to permissions only.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{GatewayError, Result};
use crate::identity::Identity;
use crate::types::{Acl, Category, CredentialKind, Operation};

pub fn check_operation(identity: &Identity, op: Operation) -> Result<()> {
    if identity.grants().ops.contains(&op) {
        return Ok(());
    }
    Err(GatewayError::Unauthorized(format!(
        "credential '{}' does not have the '{}' operation",
        identity.id(),
        op
    )))
}

pub fn check_acl(identity: &Identity, acl: Acl) -> Result<()> {
    if identity.grants().acls.contains(&acl) {
        return Ok(());
    }
    Err(GatewayError::Unauthorized(format!(
        "credential '{}' does not have access to the '{}' acl",
        identity.id(),
        acl
    )))
}

pub fn check_category(identity: &Identity, category: Category) -> Result<()> {
    match &identity.grants().categories {
        None => Ok(()),
        Some(allowed) if allowed.contains(&category) => Ok(()),
        Some(_) => Err(GatewayError::Unauthorized(format!(
            "credential '{}' does not have access to the '{}' category",
            identity.id(),
            category
        ))),
    }
}

/// Every index must match one of the identity's globs. A cluster-level
/// request (no indices) needs the `*` grant.
pub fn check_indices(identity: &Identity, indices: &[String]) -> Result<()> {
    let patterns = &identity.grants().indices;
    if indices.is_empty() {
        if identity.has_cluster_access() {
            return Ok(());
        }
        return Err(GatewayError::Unauthorized(format!(
            "credential '{}' does not have cluster-level access",
            identity.id()
        )));
    }
    let compiled = compile_globs(patterns);
    for index in indices {
        if !compiled.iter().any(|re| re.is_match(index)) {
            return Err(GatewayError::Unauthorized(format!(
                "credential '{}' does not have access to index '{}'",
                identity.id(),
                index
            )));
        }
    }
    Ok(())
}

/// `*` matches any run of characters; everything else is literal.
pub fn glob_to_regex(pattern: &str) -> String {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", escaped.join(".*"))
}

fn compile_globs(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&glob_to_regex(p)).ok())
        .collect()
}

pub fn index_pattern_matches(patterns: &[String], index: &str) -> bool {
    compile_globs(patterns).iter().any(|re| re.is_match(index))
}

pub fn check_source(identity: &Identity, remote: Option<IpAddr>) -> Result<()> {
    let sources = &identity.grants().sources;
    if identity.kind() != CredentialKind::Permission || sources.is_empty() {
        return Ok(());
    }
    let allowed = remote.is_some_and(|ip| {
        sources
            .iter()
            .filter_map(|s| Cidr::from_str(s).ok())
            .any(|cidr| cidr.contains(ip))
    });
    if allowed {
        return Ok(());
    }
    Err(GatewayError::Unauthorized(format!(
        "permission '{}' does not allow requests from {}",
        identity.id(),
        remote.map(|ip| ip.to_string()).unwrap_or_else(|| "an unknown address".to_string())
    )))
}

pub fn check_referer(identity: &Identity, referer: Option<&str>) -> Result<()> {
    let referers = &identity.grants().referers;
    if identity.kind() != CredentialKind::Permission || referers.is_empty() {
        return Ok(());
    }
    let allowed = referer.is_some_and(|r| {
        referers
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .any(|re| re.is_match(r))
    });
    if allowed {
        return Ok(());
    }
    Err(GatewayError::Unauthorized(format!(
        "permission '{}' does not allow referer '{}'",
        identity.id(),
        referer.unwrap_or("")
    )))
}

pub fn check_expiry(identity: &Identity, now: DateTime<Utc>) -> Result<()> {
    if identity.is_expired(now) {
        return Err(GatewayError::Unauthorized(format!(
            "credential '{}' has expired",
            identity.id()
        )));
    }
    Ok(())
}

/// The client address of a request. `X-Forwarded-For` is read only when the
/// socket peer is a trusted proxy; hops are walked right to left and the
/// first untrusted one is the client.
pub fn client_ip(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted: &[Cidr],
) -> Option<IpAddr> {
    let is_trusted = |ip: IpAddr| trusted.iter().any(|cidr| cidr.contains(ip));
    let peer = peer?;
    if !is_trusted(peer) {
        return Some(peer);
    }
    let hops: Vec<IpAddr> = forwarded_for
        .map(|v| v.split(',').filter_map(|h| h.trim().parse().ok()).collect())
        .unwrap_or_default();
    hops.iter()
        .rev()
        .copied()
        .find(|ip| !is_trusted(*ip))
        .or_else(|| hops.first().copied())
        .or(Some(peer))
}

/// An IPv4 or IPv6 network in CIDR notation. A bare address is a /32 or /128.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl FromStr for Cidr {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let network: IpAddr = addr
            .parse()
            .map_err(|_| GatewayError::Validation(format!("invalid CIDR '{}'", s)))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| GatewayError::Validation(format!("invalid CIDR prefix in '{}'", s)))?,
            None => max,
        };
        Ok(Self { network, prefix })
    }
}

impl Cidr {
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}
