//! Best-effort repair of pseudo-JSON lines emitted by a model.
//!
//! Valid escapes pass through untouched. Anything else that starts with a
//! backslash is made literal by doubling the backslash, so the line still
//! decodes and the model's text survives as written. That includes a
//! `\uXXXX` surrogate without its partner, which JSON decoders reject.

const SIMPLE_ESCAPES: &[char] = &['"', '\\', '/', 'b', 'f', 'n', 'r', 't'];

pub fn sanitize_json_line(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            None => {
                out.push_str("\\\\");
                i += 1;
            }
            Some(&next) if SIMPLE_ESCAPES.contains(&next) => {
                out.push('\\');
                out.push(next);
                i += 2;
            }
            Some('u') => match unicode_escape_len(&chars[i..]) {
                Some(len) => {
                    out.extend(&chars[i..i + len]);
                    i += len;
                }
                None => {
                    out.push_str("\\\\");
                    i += 1;
                }
            },
            Some(_) => {
                // Unknown or truncated escape; the following char is
                // handled on the next iteration.
                out.push_str("\\\\");
                i += 1;
            }
        }
    }
    out
}

/// Length of the valid `\u` escape at the start of `chars`: 6, or 12 for a
/// surrogate pair. `None` for short hex or an unpaired surrogate.
fn unicode_escape_len(chars: &[char]) -> Option<usize> {
    match code_unit(chars)? {
        0xD800..=0xDBFF => match code_unit(chars.get(6..)?) {
            Some(0xDC00..=0xDFFF) => Some(12),
            _ => None,
        },
        0xDC00..=0xDFFF => None,
        _ => Some(6),
    }
}

/// The code unit of a `\uXXXX` escape at the start of `chars`.
fn code_unit(chars: &[char]) -> Option<u32> {
    if chars.len() < 6 || chars[0] != '\\' || chars[1] != 'u' {
        return None;
    }
    chars[2..6]
        .iter()
        .try_fold(0u32, |unit, c| Some(unit * 16 + c.to_digit(16)?))
}
