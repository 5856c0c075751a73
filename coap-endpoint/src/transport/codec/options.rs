//! Option delta/length encoding shared by both framings (RFC 7252 §3.1).

use super::SerializeError;
use crate::message::OptionSet;

const PAYLOAD_MARKER: u8 = 0xff;
const MAX_EXTENDED_VALUE: usize = 0xffff + 269;

pub(super) fn write_options_and_payload(
    out: &mut Vec<u8>,
    options: &OptionSet,
    payload: &[u8],
) -> Result<(), SerializeError> {
    let mut previous = 0_u16;
    for (number, value) in options.to_entries() {
        if value.len() > MAX_EXTENDED_VALUE {
            return Err(SerializeError::OptionTooLong(number));
        }
        let (delta_nibble, delta_extended) = nibble(usize::from(number - previous));
        let (length_nibble, length_extended) = nibble(value.len());
        out.push((delta_nibble << 4) | length_nibble);
        out.extend_from_slice(&delta_extended);
        out.extend_from_slice(&length_extended);
        out.extend_from_slice(&value);
        previous = number;
    }
    if !payload.is_empty() {
        out.push(PAYLOAD_MARKER);
        out.extend_from_slice(payload);
    }
    Ok(())
}

fn nibble(value: usize) -> (u8, Vec<u8>) {
    if value < 13 {
        (value as u8, Vec::new())
    } else if value < 269 {
        (13, vec![(value - 13) as u8])
    } else {
        (14, ((value - 269) as u16).to_be_bytes().to_vec())
    }
}

pub(super) fn read_options_and_payload(bytes: &[u8]) -> Result<(OptionSet, Vec<u8>), String> {
    let mut options = OptionSet::new();
    let mut number = 0_u32;
    let mut index = 0;

    while index < bytes.len() {
        let header = bytes[index];
        if header == PAYLOAD_MARKER {
            let payload = &bytes[index + 1..];
            if payload.is_empty() {
                return Err("payload marker without payload".to_string());
            }
            return Ok((options, payload.to_vec()));
        }
        index += 1;

        let delta = read_extended(header >> 4, bytes, &mut index)?;
        let length = read_extended(header & 0x0f, bytes, &mut index)? as usize;
        number += delta;
        let option_number =
            u16::try_from(number).map_err(|_| format!("option number {number} out of range"))?;
        let end = index + length;
        if end > bytes.len() {
            return Err(format!("value of option {option_number} exceeds message"));
        }
        options.push_entry(option_number, bytes[index..end].to_vec());
        index = end;
    }

    Ok((options, Vec::new()))
}

fn read_extended(nibble: u8, bytes: &[u8], index: &mut usize) -> Result<u32, String> {
    match nibble {
        0..=12 => Ok(u32::from(nibble)),
        13 => {
            let byte = *bytes
                .get(*index)
                .ok_or_else(|| "truncated option header".to_string())?;
            *index += 1;
            Ok(u32::from(byte) + 13)
        }
        14 => {
            let pair = bytes
                .get(*index..*index + 2)
                .ok_or_else(|| "truncated option header".to_string())?;
            *index += 2;
            Ok(u32::from(u16::from_be_bytes([pair[0], pair[1]])) + 269)
        }
        _ => Err("reserved option nibble 15".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::options::number;

    #[test]
    fn extended_delta_and_length() {
        let mut options = OptionSet::new();
        options.uri_path = vec!["x".repeat(20)];
        options.size1 = Some(300);

        let mut out = Vec::new();
        write_options_and_payload(&mut out, &options, b"").expect("options should encode");

        // Uri-Path: delta 11, length 20 -> extended length byte 7.
        assert_eq!(out[0], (11 << 4) | 13);
        assert_eq!(out[1], 7);
        // Size1: delta 49 -> extended delta byte 36, length 2.
        assert_eq!(out[22], (13 << 4) | 2);
        assert_eq!(out[23], 36);

        let (decoded, payload) = read_options_and_payload(&out).expect("options should decode");
        assert_eq!(decoded, options);
        assert!(payload.is_empty());
    }

    #[test]
    fn marker_without_payload_is_rejected() {
        assert_eq!(
            read_options_and_payload(&[0xff]).expect_err("empty payload must fail"),
            "payload marker without payload"
        );
    }

    #[test]
    fn reserved_nibble_is_rejected() {
        assert!(read_options_and_payload(&[0xf1, 0x00]).is_err());
    }

    #[test]
    fn truncated_value_is_rejected() {
        let bytes = [((number::URI_PATH as u8) << 4) | 4, b'a'];
        assert!(read_options_and_payload(&bytes).is_err());
    }
}
