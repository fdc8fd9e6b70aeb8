//! Contract bindings for the f(x) protocol keeper.
//!
//! Interfaces are declared with `sol!` so calldata and return values are
//! typed end to end. Read-only interfaces are batched through Multicall3;
//! executor interfaces are only ever encoded, never called directly.

use alloy::primitives::{address, Address};
use alloy::sol;

/// Multicall3, same address on every EVM chain.
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// fxUSD stability pool holding fxUSD and USDC.
pub const FXUSD_BASE_POOL: Address = address!("65C9A641afCEB9C0E6034e558A319488FA0FA3be");

/// Curve stable-swap-ng pool, coin 0 = USDC, coin 1 = fxUSD.
pub const USDC_FXUSD_CURVE_POOL: Address = address!("5018BE882DccE5E3F2f3B0913AE2096B9b3fB61f");

/// Route executor used inside flash-loan callbacks.
pub const MULTI_PATH_CONVERTER: Address = address!("12AF4529129303D7FbD2563E242C4a2890525912");

sol! {
    /// Pool price oracle. `minPrice` is the one liquidations use.
    #[sol(rpc)]
    interface IPriceOracle {
        function getPrice() external view returns (uint256 anchorPrice, uint256 minPrice, uint256 maxPrice);
    }

    /// Token rate source, 1e18 scale.
    #[sol(rpc)]
    interface IRateProvider {
        function getRate() external view returns (uint256 rate);
    }

    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256 balance);
    }

    #[sol(rpc)]
    interface IFxUSDBasePool {
        function totalYieldToken() external view returns (uint256 amount);
        function totalStableToken() external view returns (uint256 amount);
        function getStableTokenPriceWithScale() external view returns (uint256 price);
    }

    #[sol(rpc)]
    interface ICurveStableSwapNG {
        function A_precise() external view returns (uint256 amp);
        function fee() external view returns (uint256 fee);
        function offpeg_fee_multiplier() external view returns (uint256 multiplier);
        function balances(uint256 index) external view returns (uint256 balance);
    }

    /// Multi-hop swap executor.
    interface IMultiPathConverter {
        function convert(address tokenIn, uint256 amount, uint256 encoding, uint256[] routes) external payable returns (uint256 amountOut);
    }

    /// Long-book batch executor. `data` is a one-byte mode followed by
    /// `abi.encode(pool, converter, swapData)`.
    interface IFxLongBatchExecutor {
        function rebalanceOrLiquidateV2WithCreditNote(uint256 amountIn, bytes data) external;
    }

    /// Long-book executor path that spends balances already held.
    interface IFxBatchV2Executor {
        function liquidateV2(address pool, address tokenIn) external;
    }

    interface IFxShortBatchExecutor {
        function shortRebalanceOrLiquidate(address baseToken, uint256 amountIn, bytes data) external;
        function shortLiquidate(address pool, address baseToken) external;
    }

    #[sol(rpc)]
    interface IMulticall3 {
        struct Call {
            address target;
            bytes callData;
        }

        function aggregate(Call[] calldata calls) external payable returns (uint256 blockNumber, bytes[] memory returnData);
    }
}
