//! Pure calldata encoders for the three swap shapes a pending intent can
//! take. V3 multi-hop paths are packed as
//! `token(20) | fee(3) | token(20) | ...`.

use ethers::abi::{encode, Token};
use ethers::types::Address;
use std::str::FromStr;
use thiserror::Error;
use types::{DexKind, PendingSwapIntent};

const SWAP_EXACT_TOKENS_FOR_TOKENS_SELECTOR: [u8; 4] = [0x38, 0xed, 0x17, 0x39];
const EXACT_INPUT_SINGLE_SELECTOR: [u8; 4] = [0x41, 0x4b, 0xf3, 0x89];
const EXACT_INPUT_SELECTOR: [u8; 4] = [0xc0, 0x4b, 0x8d, 0x59];

#[derive(Debug, Error)]
pub enum CalldataError {
    #[error("invalid address in intent: {0}")]
    InvalidAddress(String),
    #[error("v3 multi-hop intent needs at least two path hops")]
    PathTooShort,
}

fn address(value: &str) -> Result<Address, CalldataError> {
    Address::from_str(value).map_err(|_| CalldataError::InvalidAddress(value.to_string()))
}

fn amount_token(amount: rust_decimal::Decimal) -> Token {
    let scaled = amount.trunc().mantissa().unsigned_abs();
    Token::Uint(scaled.into())
}

/// Encodes `swapExactTokensForTokens(amountIn, amountOutMin, path, to, deadline)`.
pub fn encode_v2_swap(intent: &PendingSwapIntent) -> Result<Vec<u8>, CalldataError> {
    let to = address(&intent.sender)?;
    let path = vec![Token::Address(address(&intent.token_in)?), Token::Address(address(&intent.token_out)?)];
    let params = encode(&[
        amount_token(intent.amount_in),
        amount_token(intent.expected_amount_out),
        Token::Array(path),
        Token::Address(to),
        Token::Uint(intent.deadline.into()),
    ]);
    Ok([&SWAP_EXACT_TOKENS_FOR_TOKENS_SELECTOR[..], &params].concat())
}

/// Encodes `exactInputSingle((tokenIn, tokenOut, fee, recipient, deadline, amountIn, amountOutMinimum, sqrtPriceLimitX96))`.
pub fn encode_v3_single(intent: &PendingSwapIntent) -> Result<Vec<u8>, CalldataError> {
    let fee = intent.fee_bps.unwrap_or(3000);
    let params = encode(&[Token::Tuple(vec![
        Token::Address(address(&intent.token_in)?),
        Token::Address(address(&intent.token_out)?),
        Token::Uint(fee.into()),
        Token::Address(address(&intent.sender)?),
        Token::Uint(intent.deadline.into()),
        amount_token(intent.amount_in),
        amount_token(intent.expected_amount_out),
        Token::Uint(0.into()),
    ])]);
    Ok([&EXACT_INPUT_SINGLE_SELECTOR[..], &params].concat())
}

/// Packs the V3 multi-hop path as `token(20) | fee(3) | token(20) | ...` and
/// encodes `exactInput((path, recipient, deadline, amountIn, amountOutMinimum))`.
pub fn encode_v3_multi(intent: &PendingSwapIntent) -> Result<Vec<u8>, CalldataError> {
    if intent.path.len() < 2 {
        return Err(CalldataError::PathTooShort);
    }
    let fee_bytes = intent.fee_bps.unwrap_or(3000).to_be_bytes();
    let fee3 = &fee_bytes[1..]; // low 3 bytes of the u32 fee tier

    let mut packed = Vec::new();
    for (i, token) in intent.path.iter().enumerate() {
        packed.extend_from_slice(address(token)?.as_bytes());
        if i + 1 < intent.path.len() {
            packed.extend_from_slice(fee3);
        }
    }

    let params = encode(&[Token::Tuple(vec![
        Token::Bytes(packed),
        Token::Address(address(&intent.sender)?),
        Token::Uint(intent.deadline.into()),
        amount_token(intent.amount_in),
        amount_token(intent.expected_amount_out),
    ])]);
    Ok([&EXACT_INPUT_SELECTOR[..], &params].concat())
}

/// Dispatches on `dex_kind` to the matching encoder.
pub fn encode_for_intent(intent: &PendingSwapIntent) -> Result<Vec<u8>, CalldataError> {
    match intent.dex_kind {
        DexKind::UniswapV2 => encode_v2_swap(intent),
        DexKind::UniswapV3Single => encode_v3_single(intent),
        DexKind::UniswapV3Multi => encode_v3_multi(intent),
    }
}
