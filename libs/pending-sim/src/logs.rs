//! Recovers actual swap output from the Swap event emitted by the router's
//! underlying pool.

use rust_decimal::Decimal;

/// V2 `Swap(address,uint256,uint256,uint256,uint256,address)`.
pub const V2_SWAP_TOPIC: &str = "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d82";
/// V3 `Swap(address,address,int256,int256,uint160,uint128,int24)`.
pub const V3_SWAP_TOPIC: &str = "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca6";

#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSwap {
    pub pool: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
}

impl ParsedSwap {
    /// `amountOut * 1e18 / amountIn`, the execution price convention used
    /// throughout the simulator.
    pub fn execution_price(&self) -> Option<Decimal> {
        if self.amount_in.is_zero() {
            return None;
        }
        let scale = Decimal::new(1_000_000_000_000_000_000, 0);
        (self.amount_out * scale).checked_div(self.amount_in)
    }
}

fn u256_be(bytes: &[u8]) -> u128 {
    let start = bytes.len().saturating_sub(16);
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[start..]);
    u128::from_be_bytes(buf)
}

fn i256_be_abs(bytes: &[u8]) -> (bool, u128) {
    let negative = bytes[0] & 0x80 != 0;
    if !negative {
        return (false, u256_be(bytes));
    }
    let mut twos = [0u8; 32];
    twos.copy_from_slice(bytes);
    let mut carry = true;
    for byte in twos.iter_mut().rev() {
        *byte = !*byte;
        if carry {
            let (sum, overflow) = byte.overflowing_add(1);
            *byte = sum;
            carry = overflow;
        }
    }
    (true, u256_be(&twos))
}

fn decimal_from_u128(value: u128) -> Decimal {
    Decimal::from_i128_with_scale(value as i128, 0)
}

/// Parses every recognised Swap log, skipping anything else (other events,
/// malformed data). A V2 log's zero side identifies direction; a V3 log's
/// sign does.
pub fn parse_swap_logs(logs: &[RawLog]) -> Vec<ParsedSwap> {
    let mut swaps = Vec::new();
    for log in logs {
        let Some(topic0) = log.topics.first() else { continue };
        if topic0.eq_ignore_ascii_case(V2_SWAP_TOPIC) && log.data.len() >= 128 {
            let amount0_in = u256_be(&log.data[0..32]);
            let amount1_in = u256_be(&log.data[32..64]);
            let amount0_out = u256_be(&log.data[64..96]);
            let amount1_out = u256_be(&log.data[96..128]);
            let amount_in = amount0_in.max(amount1_in);
            let amount_out = amount0_out.max(amount1_out);
            if amount_in > 0 && amount_out > 0 {
                swaps.push(ParsedSwap {
                    pool: log.address.clone(),
                    amount_in: decimal_from_u128(amount_in),
                    amount_out: decimal_from_u128(amount_out),
                });
            }
        } else if topic0.eq_ignore_ascii_case(V3_SWAP_TOPIC) && log.data.len() >= 64 {
            let (amount0_neg, amount0_abs) = i256_be_abs(&log.data[0..32]);
            let (amount1_neg, amount1_abs) = i256_be_abs(&log.data[32..64]);
            // The positive side is what the sender paid in; the negative
            // side is what the pool paid out.
            let (amount_in, amount_out) = if !amount0_neg && amount1_neg {
                (amount0_abs, amount1_abs)
            } else if amount0_neg && !amount1_neg {
                (amount1_abs, amount0_abs)
            } else {
                continue;
            };
            swaps.push(ParsedSwap {
                pool: log.address.clone(),
                amount_in: decimal_from_u128(amount_in),
                amount_out: decimal_from_u128(amount_out),
            });
        }
    }
    swaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be_u256(value: u128) -> Vec<u8> {
        let mut out = vec![0u8; 32];
        out[16..].copy_from_slice(&value.to_be_bytes());
        out
    }

    fn be_i256_negative(value: u128) -> Vec<u8> {
        // two's complement of `value` over 32 bytes
        let mut magnitude = [0u8; 32];
        magnitude[16..].copy_from_slice(&value.to_be_bytes());
        let mut carry = true;
        for byte in magnitude.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (sum, overflow) = byte.overflowing_add(1);
                *byte = sum;
                carry = overflow;
            }
        }
        magnitude.to_vec()
    }

    #[test]
    fn parses_v2_swap_log_direction_from_the_zero_side() {
        let mut data = Vec::new();
        data.extend(be_u256(1_000)); // amount0In
        data.extend(be_u256(0)); // amount1In
        data.extend(be_u256(0)); // amount0Out
        data.extend(be_u256(900)); // amount1Out
        let log = RawLog { address: "0xpool".into(), topics: vec![V2_SWAP_TOPIC.to_string()], data };
        let swaps = parse_swap_logs(&[log]);
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].amount_in, Decimal::from(1_000));
        assert_eq!(swaps[0].amount_out, Decimal::from(900));
    }

    #[test]
    fn parses_v3_swap_log_direction_from_sign() {
        let mut data = Vec::new();
        data.extend(be_u256(1_000)); // amount0: positive, sender paid in
        data.extend(be_i256_negative(900)); // amount1: negative, pool paid out
        data.extend(be_u256(0)); // sqrtPriceX96
        data.extend(be_u256(0)); // liquidity
        data.extend(be_u256(0)); // tick
        let log = RawLog { address: "0xpool".into(), topics: vec![V3_SWAP_TOPIC.to_string()], data };
        let swaps = parse_swap_logs(&[log]);
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].amount_in, Decimal::from(1_000));
        assert_eq!(swaps[0].amount_out, Decimal::from(900));
    }

    #[test]
    fn execution_price_scales_by_1e18() {
        let swap = ParsedSwap { pool: "0xpool".into(), amount_in: Decimal::from(2), amount_out: Decimal::from(1) };
        assert_eq!(swap.execution_price(), Some(Decimal::new(500_000_000_000_000_000, 0)));
    }

    #[test]
    fn unrecognised_topics_are_skipped() {
        let log = RawLog { address: "0xpool".into(), topics: vec!["0xdeadbeef".to_string()], data: vec![0; 128] };
        assert!(parse_swap_logs(&[log]).is_empty());
    }
}
