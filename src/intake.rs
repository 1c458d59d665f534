// =============================================================================
// INTAKE MODULE
// =============================================================================
// Turns raw scanner / keyboard input into a code the backend understands.
//
// Hardware scanners may prepend an AIM symbology identifier (`]C1`, `]d2`,
// ...) and embed GS1 group separators (0x1D) between application
// identifiers. Neither is part of an assortment code.
// =============================================================================

use crate::error::FlowError;
use crate::flow::Direction;

/// ASCII group separator
pub const GROUP_SEPARATOR: char = '\u{1d}';

/// Normalizes a scanned or typed code.
///
/// Trims whitespace, and for outbound flows strips the AIM prefix and then
/// every group separator.
pub fn normalize_scanned_code(raw: &str, direction: Direction) -> Result<String, FlowError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FlowError::EmptyCode);
    }

    let code = match direction {
        Direction::Inbound => trimmed.to_string(),
        Direction::Outbound => strip_group_separators(strip_aim_identifier(trimmed)),
    };

    if code.is_empty() {
        return Err(FlowError::EmptyCode);
    }
    Ok(code)
}

/// Removes one leading `]` + letter + digit symbology identifier.
pub fn strip_aim_identifier(code: &str) -> &str {
    let Some(rest) = code.strip_prefix(']') else {
        return code;
    };
    match rest.as_bytes() {
        [symbology, modifier, ..]
            if symbology.is_ascii_alphabetic() && modifier.is_ascii_digit() =>
        {
            &rest[2..]
        }
        _ => code,
    }
}

/// Removes every embedded group separator.
pub fn strip_group_separators(code: &str) -> String {
    code.chars().filter(|c| *c != GROUP_SEPARATOR).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "]C1012345678901234\u{1d}99200101";

    #[test]
    fn aim_prefix_is_stripped_alone() {
        assert_eq!(strip_aim_identifier(RAW), "012345678901234\u{1d}99200101");
        // Only one prefix, and only at the start
        assert_eq!(strip_aim_identifier("]C1]C1ABC"), "]C1ABC");
        assert_eq!(strip_aim_identifier("AB]C1"), "AB]C1");
        // Needs letter + digit
        assert_eq!(strip_aim_identifier("]11ABC"), "]11ABC");
        assert_eq!(strip_aim_identifier("]C"), "]C");
    }

    #[test]
    fn group_separators_are_stripped_alone() {
        assert_eq!(
            strip_group_separators("012345678901234\u{1d}99200101"),
            "01234567890123499200101"
        );
        assert_eq!(strip_group_separators("\u{1d}A\u{1d}\u{1d}B"), "AB");
    }

    #[test]
    fn outbound_codes_get_both_passes() {
        assert_eq!(
            normalize_scanned_code(RAW, Direction::Outbound).unwrap(),
            "01234567890123499200101"
        );
        assert_eq!(
            normalize_scanned_code("  K-100 \n", Direction::Outbound).unwrap(),
            "K-100"
        );
    }

    #[test]
    fn inbound_codes_are_only_trimmed() {
        assert_eq!(
            normalize_scanned_code("  ]C1ITEM ", Direction::Inbound).unwrap(),
            "]C1ITEM"
        );
    }

    #[test]
    fn empty_codes_are_rejected() {
        assert_eq!(
            normalize_scanned_code("   ", Direction::Inbound),
            Err(FlowError::EmptyCode)
        );
        assert_eq!(
            normalize_scanned_code("]C1\u{1d}", Direction::Outbound),
            Err(FlowError::EmptyCode)
        );
    }
}
