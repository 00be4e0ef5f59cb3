//! `numeric` in its binary wire form: a header of four 16-bit words
//! (digit count, weight, sign, display scale) followed by base-10000 digit
//! groups, most significant first.

use std::error::Error;

use tokio_postgres::types::{FromSql, Type};
use tokio_util::bytes::{BufMut, BytesMut};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// A decoded `numeric`. Precision beyond `f64` is lost.
pub(super) struct PgNumeric(pub f64);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("numeric value shorter than its header".into());
        }
        let word = |i: usize| i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
        let ndigits = usize::try_from(word(0))?;
        let weight = i32::from(word(1));
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        match sign {
            NUMERIC_NAN => return Ok(PgNumeric(f64::NAN)),
            NUMERIC_PINF => return Ok(PgNumeric(f64::INFINITY)),
            NUMERIC_NINF => return Ok(PgNumeric(f64::NEG_INFINITY)),
            _ => {}
        }
        if raw.len() < 8 + 2 * ndigits {
            return Err("numeric value truncated".into());
        }
        let mut value = 0f64;
        for i in 0..ndigits {
            let exponent = weight - i32::try_from(i)?;
            value += f64::from(word(4 + i)) * 10_000f64.powi(exponent);
        }
        if sign == NUMERIC_NEG {
            value = -value;
        }
        Ok(PgNumeric(value))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Encode a plain decimal literal (`-12.50`, `7`) as a binary `numeric`.
pub(super) fn encode_numeric(
    literal: &str,
    out: &mut BytesMut,
) -> Result<(), Box<dyn Error + Sync + Send>> {
    if literal == "NaN" {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(NUMERIC_NAN);
        out.put_u16(0);
        return Ok(());
    }
    let (negative, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty()
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(format!("{literal:?} is not a finite decimal").into());
    }

    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded = format!(
        "{}{int_part}{frac_part}{}",
        "0".repeat(int_pad),
        "0".repeat(frac_pad)
    );
    let mut digits: Vec<i16> = padded
        .as_bytes()
        .chunks(4)
        .map(|group| {
            group
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect();
    let mut weight = i16::try_from((int_part.len() + int_pad) / 4)? - 1;

    let leading = digits.iter().take_while(|d| **d == 0).count();
    digits.drain(..leading);
    weight -= i16::try_from(leading)?;
    while digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(digits.len())?);
    out.put_i16(weight);
    out.put_u16(if negative && !digits.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    });
    out.put_u16(u16::try_from(frac_part.len())?);
    for digit in digits {
        out.put_i16(digit);
    }
    Ok(())
}
