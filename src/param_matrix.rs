//! Parameter-matrix analysis.
//!
//! A partially-parametric standard (the general `Standard` shape) lets
//! the same parameter handle appear in more than one S-matrix cell, which
//! is how a reciprocal through or line expresses "the forward and reverse
//! transmission coefficient are the same unknown". That reuse is only
//! sound if every appearance of a handle implies the same pair of
//! calibration ports; this module checks that before a standard is
//! accepted, and derives the forward/reverse port maps the equation
//! builder and accumulator rely on.

use std::collections::HashMap;

use crate::error::{PortConflict, Result, UsageError};
use crate::parameter::{ParamHandle, VNACAL_MATCH, VNACAL_OPEN, VNACAL_SHORT, VNACAL_ZERO};

/// True for the four predefined handles, which carry no port-identity
/// information (every standard may use them anywhere).
fn is_predefined(handle: ParamHandle) -> bool {
    matches!(handle, VNACAL_ZERO | VNACAL_MATCH | VNACAL_OPEN | VNACAL_SHORT)
}

/// The unordered full-port pair a handle's use implies.
fn canonical_pair(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Verifies that no non-predefined handle in `s` is used across two
/// structurally inconsistent full-port pairs, given the standard's
/// `port_map` (local index -> full-calibration port).
///
/// Returns the forward port map (`full_row -> full_column` for every
/// reachable off-diagonal cell that shares a handle with its mirror) on
/// success, for use by callers that want to confirm a standard behaves
/// reciprocally before trusting a single handle for both directions.
pub fn validate(port_map: &[usize], s: &[Vec<ParamHandle>]) -> Result<HashMap<usize, usize>> {
    let mut seen: HashMap<ParamHandle, (usize, usize)> = HashMap::new();
    let mut forward: HashMap<usize, usize> = HashMap::new();

    let n = port_map.len();
    for i in 0..n {
        for j in 0..n {
            let handle = s[i][j];
            if is_predefined(handle) {
                continue;
            }
            let full_i = port_map[i];
            let full_j = port_map[j];
            let pair = canonical_pair(full_i, full_j);
            match seen.get(&handle) {
                None => {
                    seen.insert(handle, pair);
                }
                Some(&prev) if prev == pair => {}
                Some(&prev) => {
                    let expected_port = if prev.0 == full_i || prev.0 == full_j { prev.1 } else { prev.0 };
                    return Err(UsageError::PortConflict(PortConflict { row: full_i, column: full_j, expected_port, found_port: full_j }).into());
                }
            }
            if i != j {
                forward.insert(full_i, full_j);
            }
        }
    }
    Ok(forward)
}

/// Builds the reverse of a forward port map (`full_column -> full_row`),
/// for callers that walk a standard in the opposite direction.
pub fn reverse_map(forward: &HashMap<usize, usize>) -> HashMap<usize, usize> {
    forward.iter().map(|(&k, &v)| (v, k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_through_reuses_one_handle_cleanly() {
        let handle = 10;
        let s = vec![vec![VNACAL_ZERO, handle], vec![handle, VNACAL_ZERO]];
        let forward = validate(&[0, 1], &s).unwrap();
        assert_eq!(forward.get(&0), Some(&1));
        assert_eq!(forward.get(&1), Some(&0));
    }

    #[test]
    fn predefined_handles_never_conflict() {
        let s = vec![vec![VNACAL_OPEN, VNACAL_MATCH], vec![VNACAL_MATCH, VNACAL_SHORT]];
        assert!(validate(&[0, 1], &s).is_ok());
    }

    #[test]
    fn same_handle_at_two_different_port_pairs_is_rejected() {
        let handle = 10;
        // Two standards glued together here for the test: handle 10 used
        // between ports (0,1) in one cell and (0,2) in another.
        let s = vec![vec![VNACAL_ZERO, handle, handle], vec![handle, VNACAL_ZERO, VNACAL_ZERO], vec![handle, VNACAL_ZERO, VNACAL_ZERO]];
        let err = validate(&[0, 1, 2], &s).unwrap_err();
        assert!(matches!(err, crate::error::VnaCalError::Usage(UsageError::PortConflict(_))));
    }

    #[test]
    fn reverse_map_inverts_forward_map() {
        let mut forward = HashMap::new();
        forward.insert(0usize, 1usize);
        forward.insert(1, 0);
        let reverse = reverse_map(&forward);
        assert_eq!(reverse.get(&1), Some(&0));
        assert_eq!(reverse.get(&0), Some(&1));
    }
}
