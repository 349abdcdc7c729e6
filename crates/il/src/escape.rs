//! String escape decoding and encoding
//!
//! The escape alphabet is fixed: `\n`, `\t`, `\"`, `\\`, and `\xHH` with
//! exactly two hex digits. The encoder emits the minimal set the decoder
//! recognises so that parse∘print∘parse is the identity; in particular a
//! newline always serialises as the two characters `\n`, never as a raw
//! line break.

/// Decode the body of a quoted string literal (without the quotes).
/// Returns the literal bytes, or the offending escape text on failure.
pub fn decode(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err("\\x".to_string());
                };
                let (Some(hi), Some(lo)) = (hi.to_digit(16), lo.to_digit(16)) else {
                    return Err(format!("\\x{}{}", hi, lo));
                };
                out.push((hi * 16 + lo) as u8 as char);
            }
            Some(other) => return Err(format!("\\{}", other)),
            None => return Err("\\".to_string()),
        }
    }
    Ok(out)
}

/// Encode literal bytes as a string literal body. Printable ASCII passes
/// through verbatim apart from `"` and `\`; everything else becomes an
/// escape.
pub fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if (' '..='~').contains(&c) => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\x{:02X}", byte));
                }
            }
        }
    }
    out
}
