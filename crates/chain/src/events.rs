//! Position lifecycle events: decoding and live WebSocket subscription.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

use crate::capabilities::EventStream;
use crate::contracts::{event_signatures, IPerpEngine};
use crate::error::ChainError;

/// Lifecycle event kinds, one per engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Opened,
    Closed,
    Liquidated,
}

impl EventKind {
    /// Topic0 for this kind.
    pub fn signature(&self) -> B256 {
        match self {
            EventKind::Opened => event_signatures::POSITION_OPENED,
            EventKind::Closed => event_signatures::POSITION_CLOSED,
            EventKind::Liquidated => event_signatures::POSITION_LIQUIDATED,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Opened => "PositionOpened",
            EventKind::Closed => "PositionClosed",
            EventKind::Liquidated => "PositionLiquidated",
        }
    }
}

/// Decoded lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionEvent {
    Opened {
        user: Address,
        block_number: u64,
        tx_hash: B256,
    },
    Closed {
        user: Address,
        block_number: u64,
        tx_hash: B256,
    },
    Liquidated {
        user: Address,
        liquidator: Address,
        reward: U256,
        block_number: u64,
        tx_hash: B256,
    },
}

impl PositionEvent {
    /// Account whose position changed.
    pub fn user(&self) -> Address {
        match self {
            Self::Opened { user, .. } | Self::Closed { user, .. } | Self::Liquidated { user, .. } => {
                *user
            }
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Opened { .. } => EventKind::Opened,
            Self::Closed { .. } => EventKind::Closed,
            Self::Liquidated { .. } => EventKind::Liquidated,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Opened { block_number, .. }
            | Self::Closed { block_number, .. }
            | Self::Liquidated { block_number, .. } => *block_number,
        }
    }

    /// Whether the event ends the position.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Opened { .. })
    }
}

/// Decode a raw log into a lifecycle event. Unknown or malformed logs yield `None`.
pub fn parse_position_event(log: &Log) -> Option<PositionEvent> {
    let sig = *log.topics().first()?;
    let block_number = log.block_number.unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();

    let event = if sig == event_signatures::POSITION_OPENED {
        let decoded = log.log_decode::<IPerpEngine::PositionOpened>().ok()?;
        PositionEvent::Opened {
            user: decoded.inner.data.user,
            block_number,
            tx_hash,
        }
    } else if sig == event_signatures::POSITION_CLOSED {
        let decoded = log.log_decode::<IPerpEngine::PositionClosed>().ok()?;
        PositionEvent::Closed {
            user: decoded.inner.data.user,
            block_number,
            tx_hash,
        }
    } else if sig == event_signatures::POSITION_LIQUIDATED {
        let decoded = log.log_decode::<IPerpEngine::PositionLiquidated>().ok()?;
        PositionEvent::Liquidated {
            user: decoded.inner.data.user,
            liquidator: decoded.inner.data.liquidator,
            reward: decoded.inner.data.reward,
            block_number,
            tx_hash,
        }
    } else {
        return None;
    };

    Some(event)
}

/// Reward from the `PositionLiquidated` event for `user` among receipt logs.
pub fn find_liquidation_reward(logs: &[Log], user: Address) -> Option<U256> {
    logs.iter()
        .filter_map(parse_position_event)
        .find_map(|event| match event {
            PositionEvent::Liquidated {
                user: liquidated,
                reward,
                ..
            } if liquidated == user => Some(reward),
            _ => None,
        })
}

/// WebSocket subscription to the engine's lifecycle events.
pub struct EventListener {
    ws_url: String,
    contract: Address,
}

impl EventListener {
    pub fn new(ws_url: impl Into<String>, contract: Address) -> Self {
        Self {
            ws_url: ws_url.into(),
            contract,
        }
    }

    /// Subscribe to `PositionOpened`, `PositionClosed` and `PositionLiquidated`.
    pub async fn subscribe_position_events(&self) -> Result<EventStream, ChainError> {
        info!(
            contract = %self.contract,
            ws_url = %self.ws_url,
            "Subscribing to position events"
        );

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(|e| ChainError::Connectivity(e.to_string()))?;

        let filter = Filter::new()
            .address(self.contract)
            .event_signature(event_signatures::lifecycle_signatures());

        let sub = provider
            .subscribe_logs(&filter)
            .await
            .map_err(ChainError::from_transport_error)?;
        let inner_stream = sub.into_stream();
        info!("WebSocket subscription active for position events");

        // The provider rides along in the stream state so the socket stays open.
        let event_stream = futures::stream::unfold(
            (provider, inner_stream),
            |(provider, mut stream)| async move {
                loop {
                    let log = stream.next().await?;
                    match parse_position_event(&log) {
                        Some(event) => {
                            debug!(
                                event = event.kind().name(),
                                user = %event.user(),
                                block = event.block_number(),
                                "Live position event"
                            );
                            return Some((event, (provider, stream)));
                        }
                        None => warn!(tx_hash = ?log.transaction_hash, "Skipping undecodable log"),
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }
}
