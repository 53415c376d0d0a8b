//! Health Monitor: probe balances, credentials, and container-engine
//! reachability, and classify the node as healthy or not. Stateless and
//! pure given a snapshot; the 15-minute cache lives on the work loop, not
//! here.

use worknode_core::NodeConfig;

/// Minimum SOL balance (lamports-denominated but named in SOL per spec) a
/// node must hold to be considered healthy.
pub const MIN_SOL_BALANCE: u64 = 10_000_000; // 0.01 SOL at 1e9 lamports/SOL

/// Balances and counts the monitor probed this check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub sol_balance: u64,
    pub nos_balance: u64,
    pub nft_count: u32,
}

/// One independent reason the node is currently unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhealthyReason {
    SignerKeyAbsent,
    InsufficientSolBalance { have: u64, need: u64 },
    NoAccessNft,
    BlobCredentialAbsent,
    ContainerEngineUnreachable,
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy(HealthSnapshot),
    Unhealthy(HealthSnapshot, Vec<UnhealthyReason>),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy(_))
    }
}

/// Inputs the monitor cannot derive from [`NodeConfig`] alone: the probed
/// balances/NFT count and the container engine's reachability.
pub struct HealthProbe {
    pub snapshot: HealthSnapshot,
    pub container_engine_reachable: bool,
}

/// Classify a probed snapshot against the node's configuration. Pure: the
/// caller is responsible for performing the underlying RPC/container
/// probes and for the 15-minute call cadence.
pub fn check(config: &NodeConfig, probe: HealthProbe) -> HealthStatus {
    let mut reasons = Vec::new();

    if config.signer_key.is_empty() {
        reasons.push(UnhealthyReason::SignerKeyAbsent);
    }
    if probe.snapshot.sol_balance < MIN_SOL_BALANCE {
        reasons.push(UnhealthyReason::InsufficientSolBalance {
            have: probe.snapshot.sol_balance,
            need: MIN_SOL_BALANCE,
        });
    }
    if probe.snapshot.nft_count < 1 && !config.open_market {
        reasons.push(UnhealthyReason::NoAccessNft);
    }
    if config.blob_credential.is_none() {
        reasons.push(UnhealthyReason::BlobCredentialAbsent);
    }
    if !probe.container_engine_reachable {
        reasons.push(UnhealthyReason::ContainerEngineUnreachable);
    }

    if reasons.is_empty() {
        HealthStatus::Healthy(probe.snapshot)
    } else {
        HealthStatus::Unhealthy(probe.snapshot, reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use worknode_core::Address;

    fn base_config(open_market: bool, blob_credential: Option<String>) -> NodeConfig {
        NodeConfig {
            network: "devnet".to_string(),
            market_addr: Address([1u8; 32]),
            node_addr: Address([2u8; 32]),
            rpc_url: reqwest::Url::parse("http://localhost:1").unwrap(),
            blob_url: reqwest::Url::parse("http://localhost:2").unwrap(),
            container_engine_url: reqwest::Url::parse("http://localhost:3").unwrap(),
            signer_key: vec![1, 2, 3],
            blob_credential,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(60),
            open_market,
            state_dir: std::path::PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn healthy_when_every_condition_clears() {
        let config = base_config(false, Some("token".to_string()));
        let status = check(
            &config,
            HealthProbe {
                snapshot: HealthSnapshot { sol_balance: MIN_SOL_BALANCE, nos_balance: 0, nft_count: 1 },
                container_engine_reachable: true,
            },
        );
        assert!(status.is_healthy());
    }

    #[test]
    fn low_balance_and_missing_nft_both_reported() {
        let config = base_config(false, Some("token".to_string()));
        let status = check(
            &config,
            HealthProbe {
                snapshot: HealthSnapshot { sol_balance: 0, nos_balance: 0, nft_count: 0 },
                container_engine_reachable: true,
            },
        );
        let HealthStatus::Unhealthy(_, reasons) = status else {
            panic!("expected unhealthy");
        };
        assert!(reasons.contains(&UnhealthyReason::InsufficientSolBalance {
            have: 0,
            need: MIN_SOL_BALANCE
        }));
        assert!(reasons.contains(&UnhealthyReason::NoAccessNft));
    }

    #[test]
    fn open_market_waives_the_nft_requirement() {
        let config = base_config(true, Some("token".to_string()));
        let status = check(
            &config,
            HealthProbe {
                snapshot: HealthSnapshot { sol_balance: MIN_SOL_BALANCE, nos_balance: 0, nft_count: 0 },
                container_engine_reachable: true,
            },
        );
        assert!(status.is_healthy());
    }

    #[test]
    fn unreachable_container_engine_is_reported() {
        let config = base_config(true, Some("token".to_string()));
        let status = check(
            &config,
            HealthProbe {
                snapshot: HealthSnapshot { sol_balance: MIN_SOL_BALANCE, nos_balance: 0, nft_count: 0 },
                container_engine_reachable: false,
            },
        );
        let HealthStatus::Unhealthy(_, reasons) = status else {
            panic!("expected unhealthy");
        };
        assert_eq!(reasons, vec![UnhealthyReason::ContainerEngineUnreachable]);
    }
}
