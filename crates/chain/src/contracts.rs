//! Contract bindings for the DomaLend protocol.
//!
//! This module provides type definitions and ABI constants for interacting
//! with the DomaLend lending contract and the DomaRank oracle contract.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

// Define contract interfaces using sol! macro for ABI generation
sol! {
    /// DomaLend lending contract (event surface only; loan accounting
    /// itself lives on-chain and is out of scope here).
    interface IDomaLend {
        event LoanCreated(
            uint256 indexed loanId,
            address indexed lender,
            address tokenAddress,
            uint256 amount,
            uint256 interestRate,
            uint256 duration,
            address indexed collateralAddress,
            uint256 collateralAmount,
            uint256 minCollateralRatioBPS,
            uint256 liquidationThresholdBPS,
            uint256 maxPriceStaleness
        );

        event LoanAccepted(uint256 indexed loanId, address indexed borrower, uint256 initialCollateralRatio);

        event LoanRepaid(uint256 indexed loanId, address indexed borrower, uint256 repaymentAmount);

        event LoanLiquidated(
            uint256 indexed loanId,
            address indexed liquidator,
            uint256 collateralClaimedByLender,
            uint256 liquidatorReward
        );

        event LoanOfferCancelled(uint256 indexed loanId, address indexed lender);

        event LoanOfferRemoved(uint256 indexed loanId, string reason);

        event OracleAddressSet(address indexed newOracleAddress);
    }

    /// DomaRank oracle contract. `updateTokenValue` is `onlyOwner` on-chain;
    /// the submitter signs with the owner key.
    #[sol(rpc)]
    interface IDomaRankOracle {
        function updateTokenValue(address tokenAddress, uint256 valueWei) external;

        function getTokenValue(address tokenAddress) external view returns (uint256);
    }
}

/// Event signature hashes (topic0) for log filtering.
///
/// Taken from the sol!-generated types so they can never drift from the
/// declared ABI.
pub mod event_signatures {
    use super::*;

    pub const LOAN_CREATED: B256 = IDomaLend::LoanCreated::SIGNATURE_HASH;
    pub const LOAN_ACCEPTED: B256 = IDomaLend::LoanAccepted::SIGNATURE_HASH;
    pub const LOAN_REPAID: B256 = IDomaLend::LoanRepaid::SIGNATURE_HASH;
    pub const LOAN_LIQUIDATED: B256 = IDomaLend::LoanLiquidated::SIGNATURE_HASH;
    pub const LOAN_OFFER_CANCELLED: B256 = IDomaLend::LoanOfferCancelled::SIGNATURE_HASH;
    pub const LOAN_OFFER_REMOVED: B256 = IDomaLend::LoanOfferRemoved::SIGNATURE_HASH;
    pub const ORACLE_ADDRESS_SET: B256 = IDomaLend::OracleAddressSet::SIGNATURE_HASH;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures_are_distinct() {
        let sigs = [
            event_signatures::LOAN_CREATED,
            event_signatures::LOAN_ACCEPTED,
            event_signatures::LOAN_REPAID,
            event_signatures::LOAN_LIQUIDATED,
            event_signatures::LOAN_OFFER_CANCELLED,
            event_signatures::LOAN_OFFER_REMOVED,
            event_signatures::ORACLE_ADDRESS_SET,
        ];
        for (i, a) in sigs.iter().enumerate() {
            for b in sigs.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_loan_created_signature_matches_abi() {
        assert_eq!(
            IDomaLend::LoanCreated::SIGNATURE,
            "LoanCreated(uint256,address,address,uint256,uint256,uint256,address,uint256,uint256,uint256,uint256)"
        );
    }
}
