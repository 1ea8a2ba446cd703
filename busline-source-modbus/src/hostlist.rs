//! Hostlist expressions.
//!
//! A compact notation for many similar host names, e.g.
//! `meter[1-3,7].example.com` or `rack[01-02]-pdu[a,b]`. Top-level commas
//! separate independent items; each bracket group is a comma list of values
//! or numeric ranges, and several groups in one item expand as a cartesian
//! product (leftmost group varies slowest).

use thiserror::Error;

/// Upper bound on the number of names one expression may produce.
pub const MAX_EXPANSION: usize = 65_536;

/// Errors from parsing a hostlist expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostListError {
    #[error("empty host list")]
    Empty,
    #[error("unbalanced brackets in '{0}'")]
    Unbalanced(String),
    #[error("invalid range '{0}'")]
    InvalidRange(String),
    #[error("expression expands to more than {MAX_EXPANSION} names")]
    TooLarge,
}

/// Expand a hostlist expression into the names it denotes, in order.
pub fn expand(expr: &str) -> Result<Vec<String>, HostListError> {
    let mut names = Vec::new();

    for item in split_top_level(expr)? {
        let item = item.trim();
        if item.is_empty() {
            return Err(HostListError::Empty);
        }
        names.extend(expand_item(item)?);
        if names.len() > MAX_EXPANSION {
            return Err(HostListError::TooLarge);
        }
    }

    if names.is_empty() {
        return Err(HostListError::Empty);
    }
    Ok(names)
}

/// Split on commas that are not inside brackets.
fn split_top_level(expr: &str) -> Result<Vec<&str>, HostListError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in expr.char_indices() {
        match c {
            '[' if depth == 0 => depth = 1,
            ']' if depth == 1 => depth = 0,
            '[' | ']' => return Err(HostListError::Unbalanced(expr.to_string())),
            ',' if depth == 0 => {
                items.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(HostListError::Unbalanced(expr.to_string()));
    }
    items.push(&expr[start..]);
    Ok(items)
}

fn expand_item(item: &str) -> Result<Vec<String>, HostListError> {
    let mut names = vec![String::new()];
    let mut rest = item;

    while let Some(open) = rest.find('[') {
        let (literal, tail) = rest.split_at(open);
        let close = tail
            .find(']')
            .ok_or_else(|| HostListError::Unbalanced(item.to_string()))?;
        let choices = expand_bracket(&tail[1..close])?;

        if names.len().saturating_mul(choices.len()) > MAX_EXPANSION {
            return Err(HostListError::TooLarge);
        }
        names = names
            .iter()
            .flat_map(|prefix| {
                choices
                    .iter()
                    .map(move |choice| format!("{prefix}{literal}{choice}"))
            })
            .collect();

        rest = &tail[close + 1..];
    }

    for name in &mut names {
        name.push_str(rest);
    }
    Ok(names)
}

/// Expand the body of one bracket group, e.g. `1-3,7` or `01-10`.
///
/// Range bounds keep the width of the lower bound, so `01-10` yields
/// `01, 02, ..., 10`.
fn expand_bracket(body: &str) -> Result<Vec<String>, HostListError> {
    let mut values = Vec::new();

    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(HostListError::InvalidRange(body.to_string()));
        }

        match part.split_once('-') {
            None => values.push(part.to_string()),
            Some((low, high)) => {
                let invalid = || HostListError::InvalidRange(part.to_string());
                let lo: u64 = low.parse().map_err(|_| invalid())?;
                let hi: u64 = high.parse().map_err(|_| invalid())?;
                if lo > hi {
                    return Err(invalid());
                }
                if (hi - lo) as usize >= MAX_EXPANSION {
                    return Err(HostListError::TooLarge);
                }
                let width = low.len();
                values.extend((lo..=hi).map(|n| format!("{n:0width$}")));
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        assert_eq!(expand("plc01").unwrap(), vec!["plc01"]);
        assert_eq!(
            expand("a.example.com, b.example.com").unwrap(),
            vec!["a.example.com", "b.example.com"]
        );
    }

    #[test]
    fn test_range_and_list() {
        assert_eq!(
            expand("foo[4-6,8].example.com").unwrap(),
            vec![
                "foo4.example.com",
                "foo5.example.com",
                "foo6.example.com",
                "foo8.example.com"
            ]
        );
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(
            expand("rack[08-11]").unwrap(),
            vec!["rack08", "rack09", "rack10", "rack11"]
        );
    }

    #[test]
    fn test_cartesian_product() {
        assert_eq!(
            expand("r[1-2]-pdu[a,b]").unwrap(),
            vec!["r1-pdua", "r1-pdub", "r2-pdua", "r2-pdub"]
        );
    }

    #[test]
    fn test_dotted_name_prefixes() {
        assert_eq!(
            expand("room.E[4-6,8]").unwrap(),
            vec!["room.E4", "room.E5", "room.E6", "room.E8"]
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(expand(""), Err(HostListError::Empty));
        assert_eq!(expand("a,,b"), Err(HostListError::Empty));
        assert!(matches!(expand("foo[1-3"), Err(HostListError::Unbalanced(_))));
        assert!(matches!(expand("foo1-3]"), Err(HostListError::Unbalanced(_))));
        assert!(matches!(expand("foo[[1]]"), Err(HostListError::Unbalanced(_))));
        assert!(matches!(expand("foo[3-1]"), Err(HostListError::InvalidRange(_))));
        assert!(matches!(expand("foo[a-b]"), Err(HostListError::InvalidRange(_))));
        assert!(matches!(expand("foo[]"), Err(HostListError::InvalidRange(_))));
        assert_eq!(expand("n[0-99999]"), Err(HostListError::TooLarge));
    }
}
