//! Registry 2.0 contract bindings and result decoding.

use alloy_primitives::{Bytes, U256};
#[cfg(any(test, feature = "testing"))]
use alloy_sol_types::sol_data;
use alloy_sol_types::{sol, SolCall, SolValue};

use keeper_core::{UpkeepKey, UpkeepResult, UpkeepState, DEFAULT_EXECUTE_GAS};

sol! {
    #[derive(Debug, Default, PartialEq, Eq)]
    struct State {
        uint32 nonce;
        uint96 ownerLinkBalance;
        uint256 expectedLinkBalance;
        uint96 totalPremium;
        uint256 numUpkeeps;
        uint32 configCount;
        uint32 latestConfigBlockNumber;
        bytes32 latestConfigDigest;
        uint32 latestEpoch;
        bool paused;
    }

    #[derive(Debug, Default, PartialEq, Eq)]
    struct OnchainConfig {
        uint32 paymentPremiumPPB;
        uint32 flatFeeMicroLink;
        uint32 checkGasLimit;
        uint24 stalenessSeconds;
        uint16 gasCeilingMultiplier;
        uint96 minUpkeepSpend;
        uint32 maxPerformGas;
        uint32 maxCheckDataSize;
        uint32 maxPerformDataSize;
        uint256 fallbackGasPrice;
        uint256 fallbackLinkPrice;
        address transcoder;
        address registrar;
    }

    /// Envelope the registry wraps around `performData` returned by a check.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct WrappedPerformData {
        uint32 checkBlockNumber;
        bytes32 checkBlockhash;
        bytes performData;
    }

    function getState() external view returns (
        State memory state,
        OnchainConfig memory config,
        address[] memory signers,
        address[] memory transmitters,
        uint8 f
    );

    function getActiveUpkeepIDs(uint256 startIndex, uint256 maxCount)
        external view returns (uint256[] memory);

    function checkUpkeep(uint256 id) external returns (
        bool upkeepNeeded,
        bytes memory performData,
        uint8 upkeepFailureReason,
        uint256 gasUsed,
        uint256 fastGasWei,
        uint256 linkNative
    );

    function simulatePerformUpkeep(uint256 id, bytes calldata performData)
        external returns (bool success, uint256 gasUsed);
}

/// Return tuple of `getState`, for scripting responses.
#[cfg(any(test, feature = "testing"))]
pub(crate) type GetStateReturn = (
    State,
    OnchainConfig,
    sol_data::Array<sol_data::Address>,
    sol_data::Array<sol_data::Address>,
    sol_data::Uint<8>,
);

/// Return tuple of `checkUpkeep`, for scripting responses.
#[cfg(any(test, feature = "testing"))]
pub(crate) type CheckUpkeepReturn = (
    sol_data::Bool,
    sol_data::Bytes,
    sol_data::Uint<8>,
    sol_data::Uint<256>,
    sol_data::Uint<256>,
    sol_data::Uint<256>,
);

// ── Call encoding ─────────────────────────────────────────────────

pub fn encode_get_state() -> Bytes {
    SolCall::abi_encode(&getStateCall {}).into()
}

pub fn encode_get_active_upkeep_ids(start: u64, max_count: u64) -> Bytes {
    let call = getActiveUpkeepIDsCall {
        startIndex: U256::from(start),
        maxCount: U256::from(max_count),
    };
    SolCall::abi_encode(&call).into()
}

pub fn encode_check_upkeep(id: U256) -> Bytes {
    SolCall::abi_encode(&checkUpkeepCall { id }).into()
}

pub fn encode_simulate_perform_upkeep(id: U256, perform_data: Bytes) -> Bytes {
    let call = simulatePerformUpkeepCall {
        id,
        performData: perform_data,
    };
    SolCall::abi_encode(&call).into()
}

// ── Result decoding ───────────────────────────────────────────────

/// Number of registered upkeeps reported by `getState`.
pub fn decode_num_upkeeps(data: &[u8]) -> Result<U256, alloy_sol_types::Error> {
    let ret = <getStateCall as SolCall>::abi_decode_returns(data)?;
    Ok(ret.state.numUpkeeps)
}

pub fn decode_active_upkeep_ids(data: &[u8]) -> Result<Vec<U256>, alloy_sol_types::Error> {
    <getActiveUpkeepIDsCall as SolCall>::abi_decode_returns(data)
}

/// Decode a `checkUpkeep` return into a result for `key`.
///
/// When the upkeep is needed the perform data is unwrapped from its
/// envelope; the returned state is provisional until simulation passes.
pub fn decode_check_result(
    key: UpkeepKey,
    data: &[u8],
) -> Result<UpkeepResult, alloy_sol_types::Error> {
    let ret = <checkUpkeepCall as SolCall>::abi_decode_returns(data)?;

    let mut result = UpkeepResult {
        key,
        state: UpkeepState::NotEligible,
        failure_reason: ret.upkeepFailureReason,
        gas_used: ret.gasUsed,
        perform_data: Bytes::new(),
        fast_gas_wei: ret.fastGasWei,
        link_native: ret.linkNative,
        check_block_number: 0,
        check_block_hash: Default::default(),
        execute_gas: DEFAULT_EXECUTE_GAS,
    };

    if ret.upkeepNeeded {
        let wrapped = <WrappedPerformData as SolValue>::abi_decode(&ret.performData)?;
        result.state = UpkeepState::Eligible;
        result.check_block_number = wrapped.checkBlockNumber;
        result.check_block_hash = wrapped.checkBlockhash;
        result.perform_data = wrapped.performData;
    }

    Ok(result)
}

/// Decode a `simulatePerformUpkeep` return into its success flag.
pub fn decode_simulate_success(data: &[u8]) -> Result<bool, alloy_sol_types::Error> {
    let ret = <simulatePerformUpkeepCall as SolCall>::abi_decode_returns(data)?;
    Ok(ret.success)
}
