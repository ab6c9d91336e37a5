//! Encodes accepted user operations into EntryPoint calldata

use alloy::{
    primitives::{Address, Bytes},
    sol,
    sol_types::SolCall,
};

use crate::models::operation::UserOperation;

// EntryPoint v0.6 handleOps entry
sol! {
    interface IEntryPoint {
        struct PackedUserOperation {
            address sender;
            uint256 nonce;
            bytes initCode;
            bytes callData;
            uint256 callGasLimit;
            uint256 verificationGasLimit;
            uint256 preVerificationGas;
            uint256 maxFeePerGas;
            uint256 maxPriorityFeePerGas;
            bytes paymasterAndData;
            bytes signature;
        }

        function handleOps(PackedUserOperation[] calldata ops, address payable beneficiary) external;
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("operation encoding failed: {0}")]
pub struct EncodeError(pub String);

/// Turns an operation into the relay transaction payload. Ledger specific.
pub trait OperationEncoder: Send + Sync {
    fn encode(&self, op: &UserOperation) -> Result<Bytes, EncodeError>;
}

/// `handleOps([op], beneficiary)` calldata for a single operation
#[derive(Debug, Clone)]
pub struct EntryPointEncoder {
    beneficiary: Address,
}

impl EntryPointEncoder {
    /// `beneficiary` receives the gas refund paid out by the EntryPoint
    pub fn new(beneficiary: Address) -> Self {
        Self { beneficiary }
    }
}

impl OperationEncoder for EntryPointEncoder {
    fn encode(&self, op: &UserOperation) -> Result<Bytes, EncodeError> {
        let packed = IEntryPoint::PackedUserOperation {
            sender: op.sender,
            nonce: op.nonce,
            initCode: op.init_code.clone(),
            callData: op.call_data.clone(),
            callGasLimit: op.call_gas_limit,
            verificationGasLimit: op.verification_gas_limit,
            preVerificationGas: op.pre_verification_gas,
            maxFeePerGas: op.max_fee_per_gas,
            maxPriorityFeePerGas: op.max_priority_fee_per_gas,
            paymasterAndData: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        };

        let call = IEntryPoint::handleOpsCall {
            ops: vec![packed],
            beneficiary: self.beneficiary,
        };

        Ok(Bytes::from(call.abi_encode()))
    }
}
