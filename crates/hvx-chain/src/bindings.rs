//! Solidity bindings for the deployed contracts.
//!
//! Only the surface the client uses is declared.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IVolatilityIndexOracle {
        function getAnnualizedVolatility() external view returns (uint256);
        function getLastUpdateTime() external view returns (uint256);

        event VolatilityUpdated(uint256 newVolatility, uint256 cumulativePrice, uint256 timestamp);
    }

    #[sol(rpc)]
    interface IVolatilityPerpetual {
        function getPositionDetails(address trader) external view returns (
            int256 size,
            uint256 margin,
            uint256 entryPrice,
            int256 unrealizedPnl,
            uint256 notionalValue,
            uint256 leverage,
            uint256 marginRatio,
            bool isLiquidatable,
            uint256 markPrice
        );
        function getLiquidationPrice(address trader) external view returns (uint256);
        function getTradePreview(int256 sizeDelta) external view returns (
            uint256 averagePrice,
            uint256 priceImpact,
            uint256 tradingFeeCost
        );
        function getRequiredMargin(int256 sizeDelta) external view returns (uint256);

        function vBaseAssetReserve() external view returns (uint256);
        function vQuoteAssetReserve() external view returns (uint256);
        function totalLongSize() external view returns (uint256);
        function totalShortSize() external view returns (uint256);
        function cumulativeFundingRate() external view returns (int256);
        function lastFundingTime() external view returns (uint256);
        function fundingInterval() external view returns (uint256);

        function maxLeverage() external view returns (uint256);
        function maintenanceMarginRatio() external view returns (uint256);
        function tradingFee() external view returns (uint256);
        function liquidationFee() external view returns (uint256);

        function openPosition(int256 sizeDelta, uint256 marginDelta) external;
        function closePosition() external;
        function liquidate(address trader) external;

        event PositionOpened(address indexed trader, int256 sizeDelta, uint256 marginDelta, uint256 averagePrice, uint256 timestamp);
        event PositionClosed(address indexed trader, int256 size, uint256 margin, int256 pnl, uint256 timestamp);
        event FundingSettled(int256 fundingRate, int256 cumulativeFundingRate, uint256 timestamp);
        event Liquidated(address indexed trader, address indexed liquidator, int256 size, uint256 liquidationReward, uint256 timestamp);
    }

    #[sol(rpc)]
    interface ICollateralToken {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function faucet(address to, uint256 amount) external;
    }
}
