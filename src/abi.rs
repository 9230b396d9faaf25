// src/abi.rs
//! Solidity interfaces the indexer decodes and the stream client calls.

use alloy::sol;

sol! {
    /// SuperBoost incentives app. Emits the three flow events and exposes the
    /// Torex stream entry points.
    #[sol(rpc)]
    contract SBIncentivesApp {
        event FlowCreated(address indexed sender, int96 flowRate);
        event FlowUpdated(address indexed sender, int96 inflowChange);
        event FlowDeleted(address indexed sender, int96 remainingInflow);

        function createStreamToTorex(int96 flowRate) external;
        function updateStreamToTorex(int96 inflowChange) external;
        function deleteStreamToTorex(int96 remainingInflow) external;
    }
}

sol! {
    #[sol(rpc)]
    interface IMacroForwarder {
        function runMacro(address macroAddress, bytes memory params) external;
    }
}

sol! {
    #[sol(rpc)]
    interface ISBMacro {
        function getParams(
            address torexAddr,
            int96 flowRate,
            address distributor,
            address referrer,
            uint256 upgradeAmount
        ) external pure returns (bytes memory);
    }
}

sol! {
    #[sol(rpc)]
    interface ITorex {
        function getPairedTokens() external view returns (address inToken, address outToken);
    }
}

sol! {
    #[sol(rpc)]
    interface ISuperToken {
        function getUnderlyingToken() external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
    }
}

sol! {
    /// Superfluid GDA pool the incentives app distributes rewards through.
    #[sol(rpc)]
    interface ISuperfluidPool {
        function claimAll() external returns (bool);
    }
}
