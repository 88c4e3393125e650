//! Shared fixtures for the multi-domain integration suites.

use std::sync::Arc;
use std::time::Duration;

use weft_runtime::{DomainConfig, InProcTransport, PolicyDomain};
use weft_types::Location;

pub struct Cluster {
    pub domains: Vec<Arc<PolicyDomain>>,
}

impl Cluster {
    pub fn pd(&self, rank: usize) -> &Arc<PolicyDomain> {
        &self.domains[rank]
    }

    /// Wait for every domain to pass the shutdown barrier; returns the exit
    /// codes in rank order.
    pub async fn join(&self) -> Vec<i32> {
        let mut codes = Vec::with_capacity(self.domains.len());
        for domain in &self.domains {
            codes.push(domain.run_until_shutdown().await);
        }
        codes
    }
}

/// Bring up `n` connected policy domains with workers running.
pub async fn cluster(n: u32) -> Cluster {
    let mesh = InProcTransport::mesh(n as usize, 64);
    let mut domains = Vec::with_capacity(n as usize);
    for (rank, transport) in mesh.into_iter().enumerate() {
        let mut cfg = DomainConfig::new(Location(rank as u32), n);
        cfg.compute_workers = 2;
        let domain = PolicyDomain::new(cfg, transport);
        domain.start().await;
        domains.push(domain);
    }
    Cluster { domains }
}

/// Test-wide deadline wrapper; a hung scenario fails instead of wedging CI.
pub async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(20), fut)
        .await
        .expect("scenario exceeded its deadline")
}
