//! Encodes a staged outgoing wire transfer into the opaque blob a bank
//! integration library consumes. The exact downstream format is out of
//! scope here; this module only fixes a stable, self-describing byte
//! layout so `exchange-db` can store it and a wire-execution component
//! (not part of this crate) can decode it later.

use crate::amount::Amount;
use crate::store::WirePrepareRecord;

#[derive(Debug, thiserror::Error)]
pub enum WireRecordError {
    #[error("wire record blob is truncated")]
    Truncated,
    #[error("wire record amount field is malformed: {0}")]
    MalformedAmount(#[from] crate::amount::AmountParseError),
    #[error("wire record string field is not valid UTF-8")]
    InvalidUtf8,
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

fn take_field<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a [u8], WireRecordError> {
    if buf.len() < *cursor + 4 {
        return Err(WireRecordError::Truncated);
    }
    let len = u32::from_be_bytes(buf[*cursor..*cursor + 4].try_into().unwrap()) as usize;
    *cursor += 4;
    if buf.len() < *cursor + len {
        return Err(WireRecordError::Truncated);
    }
    let field = &buf[*cursor..*cursor + len];
    *cursor += len;
    Ok(field)
}

/// Formats a [`WirePrepareRecord`] as a length-prefixed field sequence:
/// `wtid`, `payto_uri`, amount currency, amount value, amount fraction,
/// `exchange_base_url`, each prefixed with its length as a 4-byte
/// big-endian integer.
pub fn format_wire_prepare(record: &WirePrepareRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    push_field(&mut buf, &record.wtid);
    push_field(&mut buf, record.payto_uri.as_bytes());
    push_field(&mut buf, record.amount.currency().as_bytes());
    push_field(&mut buf, &record.amount.value.to_be_bytes());
    push_field(&mut buf, &record.amount.fraction.to_be_bytes());
    push_field(&mut buf, record.exchange_base_url.as_bytes());
    buf
}

/// Parses the format produced by [`format_wire_prepare`]. Returns the
/// fields needed to reconstruct a [`WirePrepareRecord`], since `wtid`'s
/// length is fixed by the caller's context rather than this module.
pub struct ParsedWirePrepare {
    pub wtid: Vec<u8>,
    pub payto_uri: String,
    pub amount: Amount,
    pub exchange_base_url: String,
}

pub fn parse_wire_prepare(blob: &[u8]) -> Result<ParsedWirePrepare, WireRecordError> {
    let mut cursor = 0usize;
    let wtid = take_field(blob, &mut cursor)?.to_vec();
    let payto_uri = std::str::from_utf8(take_field(blob, &mut cursor)?)
        .map_err(|_| WireRecordError::InvalidUtf8)?
        .to_string();
    let currency = std::str::from_utf8(take_field(blob, &mut cursor)?)
        .map_err(|_| WireRecordError::InvalidUtf8)?;
    let value_bytes = take_field(blob, &mut cursor)?;
    let fraction_bytes = take_field(blob, &mut cursor)?;
    let value = u64::from_be_bytes(value_bytes.try_into().map_err(|_| WireRecordError::Truncated)?);
    let fraction =
        u32::from_be_bytes(fraction_bytes.try_into().map_err(|_| WireRecordError::Truncated)?);
    let amount = Amount::from_parts(currency, value, fraction)?;
    let exchange_base_url = std::str::from_utf8(take_field(blob, &mut cursor)?)
        .map_err(|_| WireRecordError::InvalidUtf8)?
        .to_string();

    Ok(ParsedWirePrepare {
        wtid,
        payto_uri,
        amount,
        exchange_base_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_back() {
        let record = WirePrepareRecord {
            wtid: [9u8; 32],
            payto_uri: "payto://iban/DE1234".to_string(),
            amount: Amount::from_parts("EUR", 10, 5_000_000).unwrap(),
            exchange_base_url: "https://exchange.example/".to_string(),
        };
        let blob = format_wire_prepare(&record);
        let parsed = parse_wire_prepare(&blob).unwrap();
        assert_eq!(parsed.wtid, record.wtid);
        assert_eq!(parsed.payto_uri, record.payto_uri);
        assert_eq!(parsed.amount, record.amount);
        assert_eq!(parsed.exchange_base_url, record.exchange_base_url);
    }

    #[test]
    fn rejects_truncated_blob() {
        let err = parse_wire_prepare(&[0, 0, 0, 5]).unwrap_err();
        assert!(matches!(err, WireRecordError::Truncated));
    }
}
