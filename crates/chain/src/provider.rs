//! Provider management for contract reads and log queries.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capabilities::{EventSource, EventStream, PositionReader};
use crate::contracts::{IPerpEngine, PositionView};
use crate::error::ChainError;
use crate::events::{parse_position_event, EventKind, EventListener, PositionEvent};

/// Provider manager for the engine's HTTP and WebSocket endpoints.
#[derive(Clone)]
pub struct ProviderManager {
    /// HTTP URL for reads and log queries
    http_url: String,
    /// WebSocket URL for subscriptions
    ws_url: Option<String>,
    /// Perpetual engine address
    contract: Address,
}

impl ProviderManager {
    /// Create a provider manager and verify the endpoint answers.
    pub async fn new(
        http_url: &str,
        ws_url: Option<&str>,
        contract: Address,
    ) -> Result<Self, ChainError> {
        info!(
            http = http_url,
            ws = ws_url.unwrap_or("-"),
            contract = %contract,
            "Initializing provider manager"
        );

        let manager = Self {
            http_url: http_url.to_string(),
            ws_url: ws_url.map(str::to_string),
            contract,
        };

        let block = manager
            .block_number()
            .await
            .map_err(|e| ChainError::Connectivity(e.to_string()))?;
        info!(block = block, "Provider connection verified");

        Ok(manager)
    }

    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Chain ID reported by the node.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let provider = self.http_provider()?;
        provider
            .get_chain_id()
            .await
            .map_err(ChainError::from_transport_error)
    }

    fn http_provider(&self) -> Result<impl Provider, ChainError> {
        let url = self
            .http_url
            .parse()
            .map_err(|e| ChainError::Connectivity(format!("invalid rpc url {}: {e}", self.http_url)))?;
        Ok(ProviderBuilder::new().on_http(url))
    }
}

#[async_trait]
impl EventSource for ProviderManager {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let provider = self.http_provider()?;
        provider
            .get_block_number()
            .await
            .map_err(ChainError::from_transport_error)
    }

    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PositionEvent>, ChainError> {
        let provider = self.http_provider()?;
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(kind.signature())
            .from_block(from_block)
            .to_block(to_block);

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(ChainError::from_transport_error)?;

        let events: Vec<PositionEvent> = logs.iter().filter_map(parse_position_event).collect();
        if events.len() != logs.len() {
            warn!(
                event = kind.name(),
                logs = logs.len(),
                decoded = events.len(),
                "Some logs could not be decoded"
            );
        }

        debug!(
            event = kind.name(),
            from = from_block,
            to = to_block,
            count = events.len(),
            "Queried position events"
        );

        Ok(events)
    }

    async fn subscribe(&self) -> Result<EventStream, ChainError> {
        let ws_url = self.ws_url.as_deref().ok_or_else(|| {
            ChainError::SubscriptionUnavailable("no WebSocket URL configured".to_string())
        })?;
        EventListener::new(ws_url, self.contract)
            .subscribe_position_events()
            .await
    }
}

#[async_trait]
impl PositionReader for ProviderManager {
    async fn position(&self, user: Address) -> Result<PositionView, ChainError> {
        let provider = self.http_provider()?;
        let engine = IPerpEngine::new(self.contract, &provider);

        let position = engine
            .getPosition(user)
            .call()
            .await
            .map_err(ChainError::from_contract_error)?;

        Ok(PositionView::from(position._0))
    }

    async fn is_liquidatable(&self, user: Address) -> Result<bool, ChainError> {
        let provider = self.http_provider()?;
        let engine = IPerpEngine::new(self.contract, &provider);

        let result = engine
            .isLiquidatable(user)
            .call()
            .await
            .map_err(ChainError::from_contract_error)?;

        Ok(result._0)
    }
}
