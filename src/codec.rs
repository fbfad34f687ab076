use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{keccak256, Bytes},
};

use crate::errors::CodecError;

/// A function signature used symmetrically for encoding calls and decoding
/// return data. The decoder accepts exactly the byte layout the callee for
/// this signature is expected to return.
#[derive(Debug, Clone)]
pub struct AbiFunction {
    pub name: String,
    pub inputs: Vec<DynSolType>,
    pub outputs: Vec<DynSolType>,
}

impl AbiFunction {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<DynSolType>,
        outputs: Vec<DynSolType>,
    ) -> AbiFunction {
        AbiFunction {
            name: name.into(),
            inputs,
            outputs,
        }
    }

    /// Returns the canonical signature, e.g. `balanceOf(address)`.
    pub fn signature(&self) -> String {
        let params = self
            .inputs
            .iter()
            .map(|ty| ty.sol_type_name().into_owned())
            .collect::<Vec<String>>()
            .join(",");

        format!("{}({params})", self.name)
    }

    pub fn selector(&self) -> [u8; 4] {
        let digest = keccak256(self.signature().as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&digest[..4]);
        selector
    }

    /// Encodes a call payload for this signature. Fails if the argument
    /// count or any argument's shape does not match the declared inputs.
    pub fn encode_call(&self, args: &[DynSolValue]) -> Result<Bytes, CodecError> {
        if args.len() != self.inputs.len() {
            return Err(CodecError::ArityMismatch {
                expected: self.inputs.len(),
                got: args.len(),
            });
        }

        for (index, (ty, arg)) in self.inputs.iter().zip(args.iter()).enumerate() {
            if !ty.matches(arg) {
                return Err(CodecError::ArgumentTypeMismatch {
                    index,
                    expected: ty.sol_type_name().into_owned(),
                });
            }
        }

        let mut payload = self.selector().to_vec();
        payload.extend(DynSolValue::Tuple(args.to_vec()).abi_encode_params());

        Ok(payload.into())
    }

    /// Decodes raw return bytes into the declared output values. Empty
    /// bytes are reported as [`CodecError::NoReturnData`], which typically
    /// means the underlying call reverted.
    pub fn decode_return(&self, data: &[u8]) -> Result<Vec<DynSolValue>, CodecError> {
        if data.is_empty() {
            return Err(CodecError::NoReturnData);
        }

        let decoder = DynSolType::Tuple(self.outputs.clone());
        match decoder.abi_decode_sequence(data)? {
            DynSolValue::Tuple(values) => Ok(values),
            _ => Err(CodecError::UnexpectedReturnShape),
        }
    }

    /// Encodes values in this signature's return layout. This is the exact
    /// inverse of [`AbiFunction::decode_return`] and is primarily useful
    /// for building fixtures and test doubles.
    pub fn encode_return(&self, values: &[DynSolValue]) -> Result<Bytes, CodecError> {
        if values.len() != self.outputs.len() {
            return Err(CodecError::ArityMismatch {
                expected: self.outputs.len(),
                got: values.len(),
            });
        }

        for (index, (ty, value)) in self.outputs.iter().zip(values.iter()).enumerate() {
            if !ty.matches(value) {
                return Err(CodecError::ReturnTypeMismatch {
                    index,
                    expected: ty.sol_type_name().into_owned(),
                });
            }
        }

        Ok(DynSolValue::Tuple(values.to_vec()).abi_encode_params().into())
    }
}
