//! Bech32 rendering of account public keys (BIP-173)
//!
//! Only encoding is needed: addresses are derived from loaded keys and handed
//! to the gateway as opaque strings.

/// Bech32 character set (lowercase only, no confusing chars)
const CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Human-readable part for account addresses
pub const ADDRESS_HRP: &str = "erd";

/// Generator polynomial for checksum
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for &v in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ffffff) << 5) ^ (v as u32);
        for (i, &gen) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= gen;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut ret = Vec::with_capacity(hrp.len() * 2 + 1);
    ret.extend(hrp.bytes().map(|c| c >> 5));
    ret.push(0);
    ret.extend(hrp.bytes().map(|c| c & 31));
    ret
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let polymod = polymod(&values) ^ 1;
    let mut ret = [0u8; 6];
    for (i, item) in ret.iter_mut().enumerate() {
        *item = ((polymod >> (5 * (5 - i))) & 31) as u8;
    }
    ret
}

/// Regroup 8-bit bytes into padded 5-bit groups
fn to_base32(data: &[u8]) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::with_capacity(data.len() * 8 / 5 + 1);

    for &value in data {
        acc = (acc << 8) | value as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            ret.push(((acc >> bits) & 31) as u8);
        }
    }
    if bits > 0 {
        ret.push(((acc << (5 - bits)) & 31) as u8);
    }
    ret
}

/// Encode raw bytes under the given human-readable part
pub fn encode(hrp: &str, payload: &[u8]) -> String {
    let data = to_base32(payload);
    let checksum = create_checksum(hrp, &data);

    let mut out = String::with_capacity(hrp.len() + 1 + data.len() + 6);
    out.push_str(hrp);
    out.push('1');
    for d in data.iter().chain(checksum.iter()) {
        out.push(CHARSET[*d as usize] as char);
    }
    out
}

/// Render a 32-byte public key as an account address
pub fn encode_address(public_key: &[u8; 32]) -> String {
    encode(ADDRESS_HRP, public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bip173_vector() {
        // Empty data part with hrp "a" from BIP-173
        assert_eq!(encode("a", &[]), "a12uel5l");
    }

    #[test]
    fn test_system_contract_addresses() {
        let mut key = [0u8; 32];
        key[9] = 0x01;
        key[30] = 0xff;
        key[31] = 0xff;

        key[29] = 0x01;
        assert_eq!(
            encode_address(&key),
            "erd1qqqqqqqqqqqqqqqpqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqplllst77y4l"
        );

        key[29] = 0x04;
        assert_eq!(
            encode_address(&key),
            "erd1qqqqqqqqqqqqqqqpqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqylllslmq6y6"
        );
    }
}
