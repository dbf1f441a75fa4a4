//! codec.rs
//! ASCII wire format: whitespace-separated numbers.
//!
//! Sensory frame: `q0 pa0 pb0 q1 pa1 pb1 ...` (3 * dof tokens).
//! Command frame: `ca0 cb0 ca1 cb1 ...` (2 * dof tokens, integers by default).

use std::{fmt::Display, str::FromStr};

use crate::error::{AffError, Result};

pub const DEFAULT_BUFSIZE: usize = 4096;

/// What to trim from both ends of a datagram before splitting.
#[derive(Debug, Clone, Copy, Default)]
pub enum Strip<'a> {
    No,
    #[default]
    Whitespace,
    Chars(&'a str),
}

/// Splits `data` into items converted with `T::from_str`.
///
/// `sep = None` splits on runs of whitespace. Any token that fails to
/// convert aborts the whole call.
pub fn split_data<T>(data: &[u8], sep: Option<&str>, strip: Strip<'_>) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let text = std::str::from_utf8(data)
        .map_err(|e| AffError::Parse(format!("datagram is not valid UTF-8: {e}")))?;
    let text = match strip {
        Strip::No => text,
        Strip::Whitespace => text.trim(),
        Strip::Chars(chars) => text.trim_matches(|c: char| chars.contains(c)),
    };

    let convert = |tok: &str| {
        tok.parse::<T>()
            .map_err(|e| AffError::Parse(format!("invalid token '{tok}': {e}")))
    };
    match sep {
        None => text.split_whitespace().map(convert).collect(),
        Some(sep) => text.split(sep).map(convert).collect(),
    }
}

/// Strict frame parsing: every token must be numeric and there must be
/// exactly `3 * dof` of them.
pub fn parse_strict(data: &[u8], dof: usize) -> Result<Vec<f64>> {
    let values: Vec<f64> = split_data(data, None, Strip::Whitespace)?;
    let expected = 3 * dof;
    if values.len() != expected {
        return Err(AffError::ShapeMismatch { expected, actual: values.len() });
    }
    Ok(values)
}

/// Joins values with `sep`, each formatted with `precision` decimals
/// (`0` produces integers).
pub fn join_data(data: &[f64], sep: &str, precision: usize) -> String {
    data.iter()
        .map(|x| format!("{x:.precision$}"))
        .collect::<Vec<_>>()
        .join(sep)
}

pub fn encode_data(data: &[f64], sep: &str, precision: usize) -> Vec<u8> {
    join_data(data, sep, precision).into_bytes()
}

/// Command frame with the default format: space separated integers.
pub fn encode_command(ca: &[f64], cb: &[f64]) -> Result<Vec<u8>> {
    let zipped = zip_items(&[ca, cb])?;
    Ok(encode_data(&zipped, " ", 0))
}

/// De-interleaves `items` into `n` sequences taking every `n`-th element.
///
/// `unzip_items(&[1, 2, 3, 4, 5, 6], 3) == [[1, 4], [2, 5], [3, 6]]`
pub fn unzip_items<T: Clone>(items: &[T], n: usize) -> Result<Vec<Vec<T>>> {
    if n == 0 || items.len() % n != 0 {
        return Err(AffError::InvalidArgument(format!(
            "cannot unzip data with specified number of lines (n={n})"
        )));
    }
    let rows = items.len() / n;
    let mut out: Vec<Vec<T>> = (0..n).map(|_| Vec::with_capacity(rows)).collect();
    for chunk in items.chunks_exact(n) {
        for (line, v) in out.iter_mut().zip(chunk) {
            line.push(v.clone());
        }
    }
    Ok(out)
}

/// Interleaves equally sized sequences into one.
pub fn zip_items<T: Clone>(items: &[&[T]]) -> Result<Vec<T>> {
    let Some(first) = items.first() else {
        return Ok(Vec::new());
    };
    let len = first.len();
    if let Some(bad) = items.iter().find(|s| s.len() != len) {
        return Err(AffError::ShapeMismatch { expected: len, actual: bad.len() });
    }
    let mut out = Vec::with_capacity(len * items.len());
    for i in 0..len {
        out.extend(items.iter().map(|s| s[i].clone()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_whitespace_frames() {
        let v: Vec<i64> = split_data(b" 1 2  3\n", None, Strip::Whitespace).unwrap();
        assert_eq!(v, vec![1, 2, 3]);
        let v: Vec<f64> = split_data(b"0.5 1e2", None, Strip::default()).unwrap();
        assert_eq!(v, vec![0.5, 100.0]);
    }

    #[test]
    fn split_with_separator_and_custom_strip() {
        let v: Vec<i32> = split_data(b"[1,2,3]", Some(","), Strip::Chars("[]")).unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn non_numeric_token_fails() {
        let err = split_data::<f64>(b"1 x 3", None, Strip::Whitespace).unwrap_err();
        assert!(matches!(err, AffError::Parse(_)));
    }

    #[test]
    fn strict_parse_checks_token_count() {
        assert_eq!(parse_strict(b"1 2 3 4 5 6", 2).unwrap().len(), 6);
        assert!(matches!(
            parse_strict(b"1 2 3 4 5", 2),
            Err(AffError::ShapeMismatch { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn join_uses_precision() {
        assert_eq!(join_data(&[1.0, 2.4, 3.6], " ", 0), "1 2 4");
        assert_eq!(join_data(&[1.0, 2.25], ",", 2), "1.00,2.25");
        assert_eq!(encode_data(&[1.0, 2.0, 3.0], " ", 0), b"1 2 3".to_vec());
    }

    #[test]
    fn command_frame_interleaves_chambers() {
        let bytes = encode_command(&[10.0, 20.0], &[30.0, 40.0]).unwrap();
        assert_eq!(bytes, b"10 30 20 40".to_vec());
    }

    #[test]
    fn unzip_and_zip_are_inverse() {
        let items = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let lines = unzip_items(&items, 3).unwrap();
        assert_eq!(lines, vec![vec![1, 4, 7], vec![2, 5, 8], vec![3, 6, 9]]);
        let refs: Vec<&[i32]> = lines.iter().map(Vec::as_slice).collect();
        assert_eq!(zip_items(&refs).unwrap(), items.to_vec());
    }

    #[test]
    fn unzip_rejects_indivisible_length() {
        let err = unzip_items(&[1, 2, 3, 4], 3).unwrap_err();
        assert!(err.to_string().contains("n=3"));
    }

    #[test]
    fn zip_rejects_unequal_sizes() {
        let a = [1, 2, 3];
        let b = [4, 5];
        assert!(matches!(
            zip_items(&[&a[..], &b[..]]),
            Err(AffError::ShapeMismatch { expected: 3, actual: 2 })
        ));
    }
}
