use alloy_primitives::{Address, Bytes};
use ethabi::Token;
use nested_common::{
    models::{EncodedOrder, Operator, OrderArg},
    traits::OrderEncoder,
};

/// Encodes operator calls the way the Nested factory expects them.
///
/// The factory prepends an address to the call data before forwarding it to the operator. Offsets
/// of dynamic arguments are relative to the start of the full call, so the arguments are encoded
/// behind a dummy address which is then stripped.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbiOrderEncoder;

fn to_token(arg: &OrderArg) -> Token {
    match arg {
        OrderArg::Address(address) => {
            Token::Address(ethabi::Address::from_slice(address.as_slice()))
        }
        OrderArg::Uint(value) => {
            Token::Uint(ethabi::Uint::from_big_endian(&value.to_be_bytes::<32>()))
        }
        OrderArg::Bytes(data) => Token::Bytes(data.to_vec()),
    }
}

impl OrderEncoder for AbiOrderEncoder {
    fn encode(&self, operator: Operator, token: Address, args: &[OrderArg]) -> EncodedOrder {
        let tokens: Vec<Token> = std::iter::once(Token::Address(ethabi::Address::zero()))
            .chain(args.iter().map(to_token))
            .collect();
        let encoded = ethabi::encode(&tokens);

        EncodedOrder {
            operator: operator.as_bytes32(),
            token,
            call_data: Bytes::copy_from_slice(&encoded[32..]),
            commit: true,
        }
    }
}
