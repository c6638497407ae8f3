//! Contract bindings for the perpetual engine.
//!
//! The engine exposes per-account positions, a liquidation eligibility view,
//! a permissionless `liquidate` entry point and three lifecycle events.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

sol! {
    /// On-chain position record.
    #[derive(Debug)]
    struct Position {
        bool exists;
        bool isLong;
        uint256 entryPrice;
        uint256 size;
        uint256 margin;
        uint256 leverage;
        uint256 openTime;
    }

    /// Perpetual engine interface (subset used by the liquidator)
    #[sol(rpc)]
    interface IPerpEngine {
        event PositionOpened(address indexed user, bool isLong, uint256 size, uint256 margin, uint256 leverage, uint256 entryPrice);
        event PositionClosed(address indexed user, int256 pnl, uint256 exitPrice);
        event PositionLiquidated(address indexed user, address indexed liquidator, uint256 reward);

        error PositionNotLiquidatable(address user);
        error NoPosition(address user);
        error InsufficientMargin(uint256 required, uint256 available);

        function getPosition(address user) external view returns (Position memory);
        function isLiquidatable(address user) external view returns (bool);
        function liquidate(address user) external;
    }
}

/// Event topic hashes for log filtering.
pub mod event_signatures {
    use super::*;

    pub const POSITION_OPENED: B256 = IPerpEngine::PositionOpened::SIGNATURE_HASH;
    pub const POSITION_CLOSED: B256 = IPerpEngine::PositionClosed::SIGNATURE_HASH;
    pub const POSITION_LIQUIDATED: B256 = IPerpEngine::PositionLiquidated::SIGNATURE_HASH;

    /// All lifecycle signatures, for a single subscription filter.
    pub fn lifecycle_signatures() -> Vec<B256> {
        vec![POSITION_OPENED, POSITION_CLOSED, POSITION_LIQUIDATED]
    }
}

/// Position as read from the engine. Never mutated by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionView {
    pub exists: bool,
    pub is_long: bool,
    pub entry_price: U256,
    pub size: U256,
    pub margin: U256,
    pub leverage: U256,
    pub open_time: u64,
}

impl PositionView {
    /// A view for an account with no open position.
    pub fn closed() -> Self {
        Self {
            exists: false,
            is_long: false,
            entry_price: U256::ZERO,
            size: U256::ZERO,
            margin: U256::ZERO,
            leverage: U256::ZERO,
            open_time: 0,
        }
    }
}

impl From<Position> for PositionView {
    fn from(p: Position) -> Self {
        Self {
            exists: p.exists,
            is_long: p.isLong,
            entry_price: p.entryPrice,
            size: p.size,
            margin: p.margin,
            leverage: p.leverage,
            open_time: p.openTime.saturating_to::<u64>(),
        }
    }
}

/// Encode `liquidate(user)` calldata.
pub fn encode_liquidate(user: Address) -> Bytes {
    Bytes::from(IPerpEngine::liquidateCall { user }.abi_encode())
}
