//! Chain connection settings: endpoints, signer key, engine address.

use alloy::primitives::Address;
use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Optional deployment file supplying the engine address and chain id.
///
/// ```toml
/// [deployment]
/// name = "perp-testnet"
/// chain_id = 84532
/// contract = "0x..."
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentFile {
    pub deployment: DeploymentDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl DeploymentFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Resolved connection settings.
#[derive(Clone)]
pub struct ChainSettings {
    pub private_key: String,
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub contract: Address,
    pub chain_id: u64,
    pub redis_url: Option<String>,
}

impl ChainSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`. Environment values win over the
    /// deployment file named by `DEPLOYMENT_FILE`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let deployment = match get("DEPLOYMENT_FILE") {
            Some(path) => Some(DeploymentFile::load(path)?.deployment),
            None => None,
        };
        let from_file = |f: fn(&DeploymentDetails) -> Option<String>| deployment.as_ref().and_then(f);

        let private_key = get("PRIVATE_KEY").ok_or(ConfigError::Missing("PRIVATE_KEY"))?;

        let rpc_url = get("RPC_URL")
            .or_else(|| from_file(|d| d.rpc_url.clone()))
            .ok_or(ConfigError::Missing("RPC_URL"))?;

        let ws_url = get("WS_URL").or_else(|| from_file(|d| d.ws_url.clone()));

        let contract_raw = get("CONTRACT_ADDRESS")
            .or_else(|| from_file(|d| d.contract.clone()))
            .ok_or(ConfigError::Missing("CONTRACT_ADDRESS"))?;
        let contract: Address = contract_raw.trim().parse().map_err(|e| ConfigError::Invalid {
            key: "CONTRACT_ADDRESS",
            message: format!("'{contract_raw}': {e}"),
        })?;

        let chain_id = match get("CHAIN_ID") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "CHAIN_ID",
                message: format!("'{raw}': {e}"),
            })?,
            None => deployment
                .as_ref()
                .and_then(|d| d.chain_id)
                .ok_or(ConfigError::Missing("CHAIN_ID"))?,
        };

        Ok(Self {
            private_key,
            rpc_url,
            ws_url,
            contract,
            chain_id,
            redis_url: get("REDIS_URL"),
        })
    }
}

impl std::fmt::Debug for ChainSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSettings")
            .field("private_key", &"<redacted>")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .field("contract", &self.contract)
            .field("chain_id", &self.chain_id)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_settings_from_env() {
        let settings = ChainSettings::from_lookup(lookup(&[
            ("PRIVATE_KEY", "0xabc"),
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("CHAIN_ID", "31337"),
        ]))
        .unwrap();

        assert_eq!(settings.chain_id, 31337);
        assert_eq!(settings.contract, CONTRACT.parse::<Address>().unwrap());
        assert!(settings.ws_url.is_none());
        assert!(settings.redis_url.is_none());
    }

    #[test]
    fn test_missing_contract_is_error() {
        let err = ChainSettings::from_lookup(lookup(&[
            ("PRIVATE_KEY", "0xabc"),
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("CHAIN_ID", "1"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::Missing("CONTRACT_ADDRESS")));
    }

    #[test]
    fn test_malformed_contract_is_error() {
        let err = ChainSettings::from_lookup(lookup(&[
            ("PRIVATE_KEY", "0xabc"),
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("CONTRACT_ADDRESS", "0x1234"),
            ("CHAIN_ID", "1"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { key: "CONTRACT_ADDRESS", .. }));
    }

    #[test]
    fn test_deployment_file_fills_gaps() {
        let path = std::env::temp_dir().join(format!("deployment-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            format!("[deployment]\nname = \"local\"\nchain_id = 84532\ncontract = \"{CONTRACT}\"\n"),
        )
        .unwrap();
        let path_str = path.display().to_string();

        let settings = ChainSettings::from_lookup(lookup(&[
            ("PRIVATE_KEY", "0xabc"),
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("DEPLOYMENT_FILE", path_str.as_str()),
            ("CHAIN_ID", "1"),
        ]))
        .unwrap();
        std::fs::remove_file(&path).ok();

        // Env wins over the file
        assert_eq!(settings.chain_id, 1);
        assert_eq!(settings.contract, CONTRACT.parse::<Address>().unwrap());
    }

    #[test]
    fn test_debug_redacts_key() {
        let settings = ChainSettings::from_lookup(lookup(&[
            ("PRIVATE_KEY", "0xdeadbeef"),
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("CHAIN_ID", "1"),
        ]))
        .unwrap();

        assert!(!format!("{settings:?}").contains("deadbeef"));
    }
}
