use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use fleet_core::InputError;

/// Decode uploaded sheet bytes into UTF-8: BOM -> charset hint -> chardetng fallback.
pub fn decode_sheet(bytes: &[u8], charset: Option<&str>) -> Result<String, InputError> {
    if bytes.is_empty() {
        return Err(InputError::EmptySheet);
    }

    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(encoding) = charset.and_then(|label| Encoding::for_label(label.trim().as_bytes())) {
        return decode_with(bytes, encoding);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    decode_with(bytes, encoding)
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> Result<String, InputError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(InputError::Unreadable(format!(
            "bytes are not valid {}",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}
