//! Reconciles per-VNet one-sided peering records into bidirectional
//! peering-pair facts. Each physical peering appears exactly once per run
//! regardless of which side is scanned first; failures are contained at the
//! granularity of a single virtual network or peering record.

use crate::cache::{cache_key, cached_fetch, Cache};
use crate::error::{ErrorKind, Result};
use crate::peering::identity::peering_pair_id;
use crate::provider::model::{PeeringRecord, VirtualNetwork};
use crate::provider::resource_id::ResourceId;
use crate::provider::NetworkProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const STATE_CONNECTED: &str = "Connected";
pub const STATE_UNKNOWN: &str = "Unknown";
pub const STATE_NOT_CONFIGURED: &str = "NotConfigured";

/// Reconciled bidirectional peering fact. `connected` holds only when both
/// one-sided records were obtained and both report `Connected`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeeringPair {
    pub peering_id: String,
    pub vnet1_id: String,
    pub vnet1_name: String,
    pub vnet1_resource_group: String,
    pub vnet1_subscription_id: String,
    pub vnet1_to_vnet2_state: String,
    pub vnet2_id: String,
    pub vnet2_name: String,
    pub vnet2_resource_group: String,
    pub vnet2_subscription_id: String,
    pub vnet2_to_vnet1_state: String,
    pub allow_virtual_network_access: bool,
    pub allow_forwarded_traffic: bool,
    pub allow_gateway_transit: bool,
    pub use_remote_gateways: bool,
    pub provisioning_state: String,
    pub connected: bool,
}

impl PeeringPair {
    /// Partial pairs carry only what the remote identifier parse revealed.
    pub fn is_partial(&self) -> bool {
        self.vnet2_to_vnet1_state == STATE_UNKNOWN
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeeringSummary {
    pub total: usize,
    pub connected_count: usize,
    pub partial_count: usize,
    pub connectivity_percentage: f64,
}

impl PeeringSummary {
    pub fn derive(pairs: &[PeeringPair]) -> Self {
        let total = pairs.len();
        let connected_count = pairs.iter().filter(|pair| pair.connected).count();
        let partial_count = pairs.iter().filter(|pair| pair.is_partial()).count();
        let connectivity_percentage = if total == 0 {
            0.0
        } else {
            (connected_count as f64 / total as f64) * 100.0
        };
        Self {
            total,
            connected_count,
            partial_count,
            connectivity_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeeringReport {
    pub pairs: Vec<PeeringPair>,
    pub summary: PeeringSummary,
}

pub struct PeeringReconciler {
    provider: Arc<dyn NetworkProvider>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl PeeringReconciler {
    pub fn new(provider: Arc<dyn NetworkProvider>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    pub async fn report(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
        refresh: bool,
    ) -> Result<PeeringReport> {
        let pairs = self.reconcile(subscription_id, resource_group, refresh).await?;
        let summary = PeeringSummary::derive(&pairs);
        Ok(PeeringReport { pairs, summary })
    }

    /// One reconciled pair per physical peering relationship in scope,
    /// subscription-wide or filtered to one resource group. Results are
    /// cached per scope; `refresh` bypasses and overwrites.
    pub async fn reconcile(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
        refresh: bool,
    ) -> Result<Vec<PeeringPair>> {
        let key = cache_key(&[
            "peering_report",
            subscription_id,
            resource_group.unwrap_or(""),
        ]);
        cached_fetch(self.cache.as_ref(), &key, self.ttl, refresh, || {
            self.reconcile_uncached(subscription_id, resource_group)
        })
        .await
    }

    async fn reconcile_uncached(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<PeeringPair>> {
        // A failure to enumerate the subscription's networks is fatal for
        // the report; everything below this call is contained per item.
        let vnets = self
            .provider
            .list_virtual_networks(subscription_id, resource_group)
            .await?;

        debug!(
            subscription = subscription_id,
            vnets = vnets.len(),
            "reconciling peering records"
        );

        let mut pairs = Vec::new();
        let mut processed: HashSet<String> = HashSet::new();

        for vnet in &vnets {
            if vnet.id.is_empty() || vnet.name.is_empty() {
                continue;
            }
            self.process_vnet(subscription_id, vnet, &mut processed, &mut pairs)
                .await;
        }

        Ok(pairs)
    }

    async fn process_vnet(
        &self,
        subscription_id: &str,
        vnet: &VirtualNetwork,
        processed: &mut HashSet<String>,
        pairs: &mut Vec<PeeringPair>,
    ) {
        for peering in &vnet.peerings {
            let Some(remote_vnet_id) = peering.remote_vnet_id.as_deref() else {
                warn!(vnet = %vnet.name, peering = %peering.name, "peering has no remote network id");
                continue;
            };

            let remote: ResourceId = match remote_vnet_id.parse() {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(
                        vnet = %vnet.name,
                        peering = %peering.name,
                        error = %err,
                        "skipping peering with unparseable remote id"
                    );
                    continue;
                }
            };

            let pair_id = peering_pair_id(&vnet.id, remote_vnet_id);
            if !processed.insert(pair_id.clone()) {
                // Already emitted from the other side's scan.
                continue;
            }

            let pair = self
                .resolve_pair(subscription_id, vnet, peering, remote_vnet_id, &remote, pair_id)
                .await;
            pairs.push(pair);
        }
    }

    async fn resolve_pair(
        &self,
        subscription_id: &str,
        vnet: &VirtualNetwork,
        peering: &PeeringRecord,
        remote_vnet_id: &str,
        remote: &ResourceId,
        pair_id: String,
    ) -> PeeringPair {
        match self
            .provider
            .get_virtual_network(&remote.subscription_id, &remote.resource_group, &remote.name)
            .await
        {
            Ok(remote_vnet) => {
                let return_peering = find_return_peering(&remote_vnet, &vnet.id);
                self.complete_pair(
                    subscription_id,
                    vnet,
                    peering,
                    &remote_vnet,
                    remote,
                    return_peering,
                    pair_id,
                )
            }
            Err(err) => {
                // Access denied, absent, or transient: the remote side may
                // live in a subscription this identity cannot read. The pair
                // is still reported, marked partial.
                if err.kind() == ErrorKind::Unauthorized {
                    warn!(remote = %remote.name, error = %err, "remote network not accessible");
                } else {
                    warn!(remote = %remote.name, error = %err, "could not fetch remote network");
                }
                self.partial_pair(subscription_id, vnet, peering, remote_vnet_id, remote, pair_id)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn complete_pair(
        &self,
        subscription_id: &str,
        vnet: &VirtualNetwork,
        peering: &PeeringRecord,
        remote_vnet: &VirtualNetwork,
        remote: &ResourceId,
        return_peering: Option<&PeeringRecord>,
        pair_id: String,
    ) -> PeeringPair {
        let forward_state = peering.peering_state().to_string();
        let return_state = return_peering
            .map(|record| record.peering_state().to_string())
            .unwrap_or_else(|| STATE_NOT_CONFIGURED.to_string());
        let connected = return_peering.is_some()
            && forward_state == STATE_CONNECTED
            && return_state == STATE_CONNECTED;

        PeeringPair {
            peering_id: pair_id,
            vnet1_id: vnet.id.clone(),
            vnet1_name: vnet.name.clone(),
            vnet1_resource_group: local_resource_group(vnet),
            vnet1_subscription_id: subscription_id.to_string(),
            vnet1_to_vnet2_state: forward_state,
            vnet2_id: remote_vnet.id.clone(),
            vnet2_name: remote.name.clone(),
            vnet2_resource_group: remote.resource_group.clone(),
            vnet2_subscription_id: remote.subscription_id.clone(),
            vnet2_to_vnet1_state: return_state,
            allow_virtual_network_access: peering.allow_virtual_network_access,
            allow_forwarded_traffic: peering.allow_forwarded_traffic,
            allow_gateway_transit: peering.allow_gateway_transit,
            use_remote_gateways: peering.use_remote_gateways,
            provisioning_state: peering.provisioning_state().to_string(),
            connected,
        }
    }

    fn partial_pair(
        &self,
        subscription_id: &str,
        vnet: &VirtualNetwork,
        peering: &PeeringRecord,
        remote_vnet_id: &str,
        remote: &ResourceId,
        pair_id: String,
    ) -> PeeringPair {
        PeeringPair {
            peering_id: pair_id,
            vnet1_id: vnet.id.clone(),
            vnet1_name: vnet.name.clone(),
            vnet1_resource_group: local_resource_group(vnet),
            vnet1_subscription_id: subscription_id.to_string(),
            vnet1_to_vnet2_state: peering.peering_state().to_string(),
            vnet2_id: remote_vnet_id.to_string(),
            vnet2_name: remote.name.clone(),
            vnet2_resource_group: remote.resource_group.clone(),
            vnet2_subscription_id: remote.subscription_id.clone(),
            vnet2_to_vnet1_state: STATE_UNKNOWN.to_string(),
            allow_virtual_network_access: peering.allow_virtual_network_access,
            allow_forwarded_traffic: peering.allow_forwarded_traffic,
            allow_gateway_transit: peering.allow_gateway_transit,
            use_remote_gateways: peering.use_remote_gateways,
            provisioning_state: peering.provisioning_state().to_string(),
            connected: false,
        }
    }
}

fn local_resource_group(vnet: &VirtualNetwork) -> String {
    crate::provider::resource_id::resource_group_from_id(&vnet.id).unwrap_or_default()
}

/// The remote side's record whose remote-reference points back at the
/// local network.
fn find_return_peering<'a>(
    remote_vnet: &'a VirtualNetwork,
    local_vnet_id: &str,
) -> Option<&'a PeeringRecord> {
    remote_vnet
        .peerings
        .iter()
        .find(|record| record.remote_vnet_id.as_deref() == Some(local_vnet_id))
}
