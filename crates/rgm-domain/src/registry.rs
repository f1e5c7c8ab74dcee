//! The failover-domain set and per-node start eligibility.

use std::collections::HashMap;
use std::fmt;

use rgm_types::{Membership, NodeId};
use tracing::{debug, warn};

use crate::domain::{node_in_domain, DomainClass, DomainConfig, FailoverDomain};
use crate::error::{DomainError, DomainResult};

/// Eligibility of a node to run a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FodRank {
    Illegal,
    Good,
    Better,
    Best,
}

impl FodRank {
    pub fn code(self) -> u8 {
        match self {
            FodRank::Illegal => 0,
            FodRank::Good => 1,
            FodRank::Better => 2,
            FodRank::Best => 3,
        }
    }

    pub fn is_legal(self) -> bool {
        self != FodRank::Illegal
    }
}

impl fmt::Display for FodRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FodRank::Illegal => "illegal",
            FodRank::Good => "good",
            FodRank::Better => "better",
            FodRank::Best => "best",
        };
        f.write_str(s)
    }
}

/// All failover domains plus the service to domain bindings.
///
/// Built once per configuration snapshot and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct FailoverDomains {
    domains: Vec<FailoverDomain>,
    bindings: HashMap<String, String>,
}

impl FailoverDomains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the domain set from configuration. Duplicate domains are skipped.
    pub fn build(configs: &[DomainConfig], membership: &Membership) -> Self {
        let mut domains = Self::new();
        for config in configs {
            let domain = FailoverDomain::from_config(config, membership);
            if let Err(e) = domains.insert(domain) {
                warn!(error = %e, "Skipping failover domain");
            }
        }
        domains
    }

    pub fn insert(&mut self, domain: FailoverDomain) -> DomainResult<()> {
        if self.find(&domain.name).is_some() {
            return Err(DomainError::DuplicateDomain(domain.name));
        }
        debug!(domain = %domain.name, members = domain.members.len(), "Failover domain loaded");
        self.domains.push(domain);
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<&FailoverDomain> {
        self.domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailoverDomain> {
        self.domains.iter()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Bind a service to a domain by name. The domain need not exist yet.
    pub fn assign(&mut self, service: &str, domain: &str) {
        self.bindings
            .insert(service.to_ascii_lowercase(), domain.to_string());
    }

    pub fn domain_of(&self, service: &str) -> Option<&str> {
        self.bindings
            .get(&service.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Domain a service is bound to, if it is bound to one that exists.
    pub fn domain_for(&self, service: &str) -> Option<&FailoverDomain> {
        self.domain_of(service).and_then(|name| self.find(name))
    }

    /// Decide how eligible `node` is to run `service`.
    ///
    /// `owner` is the node currently running the service, if any; it is
    /// only consulted for no-failback domains. Unknown domains fail open.
    pub fn node_should_start(
        &self,
        node: NodeId,
        membership: &Membership,
        service: &str,
        owner: Option<NodeId>,
    ) -> FodRank {
        if !membership.is_online(node) {
            debug!(node = %node, service, "Node is not online");
            return FodRank::Illegal;
        }

        let Some(domain_name) = self.domain_of(service) else {
            return FodRank::Best;
        };

        let Some(domain) = self.find(domain_name) else {
            warn!(service, domain = %domain_name, "Service references unknown failover domain; allowing any node");
            return FodRank::Best;
        };

        let rank = base_rank(node, membership, domain);

        if !(domain.flags.nofailback && domain.flags.ordered) {
            return rank;
        }

        let Some(owner) = owner.filter(|o| membership.is_online(*o)) else {
            return rank;
        };

        if !base_rank(owner, membership, domain).is_legal() {
            return rank;
        }

        if node == owner {
            FodRank::Best
        } else if rank == FodRank::Best {
            FodRank::Better
        } else {
            rank
        }
    }
}

fn base_rank(node: NodeId, membership: &Membership, domain: &FailoverDomain) -> FodRank {
    let Some(name) = membership.name_of(node) else {
        return FodRank::Illegal;
    };
    if !membership.is_online(node) {
        return FodRank::Illegal;
    }

    let restricted = domain.flags.restricted;
    match node_in_domain(name, domain, membership) {
        DomainClass::NoMemberOnline | DomainClass::NotMember if restricted => FodRank::Illegal,
        DomainClass::NoMemberOnline => FodRank::Best,
        DomainClass::NotMember => FodRank::Good,
        DomainClass::Member if domain.flags.ordered => FodRank::Better,
        DomainClass::Member | DomainClass::Preferred => FodRank::Best,
    }
}
