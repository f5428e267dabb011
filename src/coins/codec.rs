//! Compact serialization for coin records.
//!
//! Records are written with a variable-length integer that biases each
//! continuation step by one, so every value has exactly one encoding.
//! Amounts are compressed through a base-10 exponent scheme and common
//! script templates collapse to a one-byte tag plus their hash or key.

use super::{CoinStake, Coins};
use bitcoin::consensus::encode;
use bitcoin::{Amount, Script, ScriptBuf, TxOut};

/// Script templates that compress to a tag: P2PKH, P2SH and the two
/// compressed public key forms (plus two reserved tags).
const SPECIAL_SCRIPTS: u64 = 6;
const MAX_SCRIPT_SIZE: usize = 10_000;

/// Upper bound for a single serialized record, used to reject corrupt
/// length prefixes before allocating.
pub const MAX_COIN_RECORD_SIZE: usize = 4_000_000;

pub(crate) struct SliceReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, encode::Error> {
        let byte = *self.bytes.get(self.pos).ok_or_else(eof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], encode::Error> {
        let end = self.pos.checked_add(len).ok_or_else(eof)?;
        let slice = self.bytes.get(self.pos..end).ok_or_else(eof)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn eof() -> encode::Error {
    encode::Error::ParseFailed("unexpected end of coin record")
}

/// Write `n` in the biased base-128 format: seven value bits per byte,
/// high bit set on every byte except the last, and each continuation
/// subtracting one so encodings are unique.
pub fn write_varint(mut n: u64, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 10];
    let mut len = 0;
    loop {
        tmp[len] = (n & 0x7F) as u8 | if len > 0 { 0x80 } else { 0x00 };
        if n <= 0x7F {
            break;
        }
        n = (n >> 7) - 1;
        len += 1;
    }
    for i in (0..=len).rev() {
        out.push(tmp[i]);
    }
}

pub fn read_varint(r: &mut SliceReader) -> Result<u64, encode::Error> {
    let mut n: u64 = 0;
    loop {
        let byte = r.read_u8()?;
        if n > u64::MAX >> 7 {
            return Err(encode::Error::ParseFailed("varint overflows u64"));
        }
        n = (n << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 != 0 {
            if n == u64::MAX {
                return Err(encode::Error::ParseFailed("varint overflows u64"));
            }
            n += 1;
        } else {
            return Ok(n);
        }
    }
}

/// Compress an amount in satoshis. Round values compress best: the
/// encoding splits off powers of ten and stores the remainder compactly.
pub fn compress_amount(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut n = n;
    let mut e = 0u64;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}

pub fn decompress_amount(x: u64) -> u64 {
    if x == 0 {
        return 0;
    }
    let mut x = x - 1;
    let mut e = x % 10;
    x /= 10;
    let mut n = if e < 9 {
        let d = (x % 9) + 1;
        x /= 9;
        x * 10 + d
    } else {
        x + 1
    };
    while e > 0 {
        n *= 10;
        e -= 1;
    }
    n
}

/// Try to compress a script to one of the special forms. Uncompressed
/// public key scripts are left to the raw encoding; reconstructing them
/// would require point decompression.
fn compress_script(script: &Script) -> Option<Vec<u8>> {
    let bytes = script.as_bytes();
    // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if bytes.len() == 25
        && bytes[0] == 0x76
        && bytes[1] == 0xa9
        && bytes[2] == 20
        && bytes[23] == 0x88
        && bytes[24] == 0xac
    {
        let mut out = Vec::with_capacity(21);
        out.push(0x00);
        out.extend_from_slice(&bytes[3..23]);
        return Some(out);
    }
    // OP_HASH160 <20> OP_EQUAL
    if bytes.len() == 23 && bytes[0] == 0xa9 && bytes[1] == 20 && bytes[22] == 0x87 {
        let mut out = Vec::with_capacity(21);
        out.push(0x01);
        out.extend_from_slice(&bytes[2..22]);
        return Some(out);
    }
    // <33 byte compressed key> OP_CHECKSIG
    if bytes.len() == 35
        && bytes[0] == 33
        && bytes[34] == 0xac
        && (bytes[1] == 0x02 || bytes[1] == 0x03)
    {
        let mut out = Vec::with_capacity(33);
        out.push(bytes[1]);
        out.extend_from_slice(&bytes[2..34]);
        return Some(out);
    }
    None
}

fn write_script(script: &Script, out: &mut Vec<u8>) {
    if let Some(compressed) = compress_script(script) {
        out.extend_from_slice(&compressed);
        return;
    }
    write_varint(script.len() as u64 + SPECIAL_SCRIPTS, out);
    out.extend_from_slice(script.as_bytes());
}

fn read_script(r: &mut SliceReader) -> Result<ScriptBuf, encode::Error> {
    let tag = read_varint(r)?;
    let script = match tag {
        0x00 => {
            let hash = r.read_exact(20)?;
            let mut raw = Vec::with_capacity(25);
            raw.extend_from_slice(&[0x76, 0xa9, 0x14]);
            raw.extend_from_slice(hash);
            raw.extend_from_slice(&[0x88, 0xac]);
            raw
        }
        0x01 => {
            let hash = r.read_exact(20)?;
            let mut raw = Vec::with_capacity(23);
            raw.extend_from_slice(&[0xa9, 0x14]);
            raw.extend_from_slice(hash);
            raw.push(0x87);
            raw
        }
        0x02 | 0x03 => {
            let x = r.read_exact(32)?;
            let mut raw = Vec::with_capacity(35);
            raw.push(33);
            raw.push(tag as u8);
            raw.extend_from_slice(x);
            raw.push(0xac);
            raw
        }
        0x04 | 0x05 => {
            return Err(encode::Error::ParseFailed(
                "uncompressed pubkey script form is never written",
            ));
        }
        _ => {
            let len = (tag - SPECIAL_SCRIPTS) as usize;
            if len > MAX_SCRIPT_SIZE {
                return Err(encode::Error::ParseFailed("script too long"));
            }
            r.read_exact(len)?.to_vec()
        }
    };
    Ok(ScriptBuf::from_bytes(script))
}

/// Serialize a record. Layout: varint version, a code folding in the
/// coinbase flag and spentness of the first two outputs, a bitmask for
/// the rest, each unspent output compressed, the varint height, then
/// the stake trailer when the record carries one.
pub fn encode_coins(coins: &Coins) -> Result<Vec<u8>, encode::Error> {
    let outputs = &coins.outputs;
    let first = matches!(outputs.first(), Some(Some(_)));
    let second = matches!(outputs.get(1), Some(Some(_)));

    // mask_bytes covers up to the last byte with an unspent output,
    // nonzero_bytes counts only the bytes that are actually set
    let mut mask_bytes = 0usize;
    let mut nonzero_bytes = 0u64;
    let mut b = 0usize;
    while 2 + b * 8 < outputs.len() {
        let mut zero = true;
        for i in 0..8 {
            let index = 2 + b * 8 + i;
            if index >= outputs.len() {
                break;
            }
            if outputs[index].is_some() {
                zero = false;
                break;
            }
        }
        if !zero {
            mask_bytes = b + 1;
            nonzero_bytes += 1;
        }
        b += 1;
    }

    if !first && !second && nonzero_bytes == 0 {
        return Err(encode::Error::ParseFailed(
            "fully spent records are deleted, not serialized",
        ));
    }

    let code = 8 * (nonzero_bytes - if first || second { 0 } else { 1 })
        + if coins.coinbase { 1 } else { 0 }
        + if first { 2 } else { 0 }
        + if second { 4 } else { 0 };

    let mut out = Vec::with_capacity(16 + outputs.len() * 8);
    write_varint(coins.version as u32 as u64, &mut out);
    write_varint(code, &mut out);

    for b in 0..mask_bytes {
        let mut avail = 0u8;
        for i in 0..8 {
            let index = 2 + b * 8 + i;
            if index < outputs.len() && outputs[index].is_some() {
                avail |= 1 << i;
            }
        }
        out.push(avail);
    }

    for output in outputs.iter().flatten() {
        write_varint(compress_amount(output.value.to_sat()), &mut out);
        write_script(&output.script_pubkey, &mut out);
    }

    write_varint(u64::from(coins.height), &mut out);

    if let Some(stake) = &coins.stake {
        out.push(stake.coinstake as u8);
        write_varint(u64::from(stake.time), &mut out);
    }

    Ok(out)
}

pub fn decode_coins(bytes: &[u8]) -> Result<Coins, encode::Error> {
    let mut r = SliceReader::new(bytes);

    let version = read_varint(&mut r)?;
    if version > u64::from(u32::MAX) {
        return Err(encode::Error::ParseFailed("coin version out of range"));
    }
    let version = version as u32 as i32;

    let code = read_varint(&mut r)?;
    let coinbase = code & 1 != 0;
    let mut avail = vec![code & 2 != 0, code & 4 != 0];

    // zero mask bytes carry position only and do not count towards the
    // nonzero total, mirroring the encoder
    let mut nonzero = (code / 8) + if code & 6 != 0 { 0 } else { 1 };
    while nonzero > 0 {
        let byte = r.read_u8()?;
        for p in 0..8 {
            avail.push(byte & (1 << p) != 0);
        }
        if byte != 0 {
            nonzero -= 1;
        }
    }

    let mut outputs = Vec::with_capacity(avail.len());
    for available in avail {
        if available {
            let amount = decompress_amount(read_varint(&mut r)?);
            let script_pubkey = read_script(&mut r)?;
            outputs.push(Some(TxOut {
                value: Amount::from_sat(amount),
                script_pubkey,
            }));
        } else {
            outputs.push(None);
        }
    }

    let height = read_varint(&mut r)?;
    if height > u64::from(u32::MAX) {
        return Err(encode::Error::ParseFailed("coin height out of range"));
    }

    // stake chains append a trailer to every record, so any remaining
    // bytes identify the chain variant
    let stake = if r.remaining() > 0 {
        let coinstake = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(encode::Error::ParseFailed("bad coinstake flag")),
        };
        let time = read_varint(&mut r)?;
        if time > u64::from(u32::MAX) {
            return Err(encode::Error::ParseFailed("stake time out of range"));
        }
        Some(CoinStake {
            coinstake,
            time: time as u32,
        })
    } else {
        None
    };

    let mut coins = Coins {
        version,
        height: height as u32,
        coinbase,
        outputs,
        stake,
    };
    coins.trim();
    Ok(coins)
}
