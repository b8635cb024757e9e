//! Standard records: one measured calibration standard (through, reflect,
//! line, double-reflect or general), its S-matrix of parameter handles,
//! its sparse M-matrix of measured traces, and its reachability matrix.

use crate::parameter::{ParamHandle, VNACAL_ZERO};
use crate::complex::C64;

/// One added standard.
///
/// `port_map[local]` gives the full-calibration port that the standard's
/// local port `local` is connected to; `s` and `reachable` are indexed by
/// local port; `m` is indexed by full-calibration (row, column).
#[derive(Debug, Clone)]
pub struct Standard {
    pub port_map: Vec<usize>,
    pub s: Vec<Vec<ParamHandle>>,
    pub reachable: Vec<Vec<bool>>,
    pub m: Vec<Vec<Option<Vec<C64>>>>,
}

impl Standard {
    /// Builds a standard from its port map, local S-matrix, and sparse
    /// full M-matrix, computing the reachability matrix via Warshall's
    /// transitive closure over the rule "an edge (i, j) exists iff
    /// `s[i][j] != VNACAL_ZERO`" (a "directed signal path").
    ///
    /// [`crate::parameter::VNACAL_MATCH`] is deliberately *not* treated as
    /// absence of an edge: a through or line standard uses `Match` on its
    /// off-diagonal cells precisely to mean "connected, identity
    /// transmission", the "identity-under-composition" semantics that
    /// `Match` carries.
    pub fn new(port_map: Vec<usize>, s: Vec<Vec<ParamHandle>>, m: Vec<Vec<Option<Vec<C64>>>>) -> Self {
        let n = port_map.len();
        let mut reachable = vec![vec![false; n]; n];
        for i in 0..n {
            for j in 0..n {
                reachable[i][j] = s[i][j] != VNACAL_ZERO;
            }
        }
        // Warshall's algorithm.
        for k in 0..n {
            for i in 0..n {
                if reachable[i][k] {
                    for j in 0..n {
                        if reachable[k][j] {
                            reachable[i][j] = true;
                        }
                    }
                }
            }
        }
        Standard { port_map, s, reachable, m }
    }

    pub fn local_dim(&self) -> usize {
        self.port_map.len()
    }

    /// Maps a full-calibration port to this standard's local port index,
    /// if the standard touches that port at all.
    pub fn local_of(&self, full_port: usize) -> Option<usize> {
        self.port_map.iter().position(|&p| p == full_port)
    }

    /// True iff a directed signal path exists from full-port `full_j` to
    /// full-port `full_i` within this standard. False if either port is
    /// not touched by this standard at all.
    pub fn full_reachable(&self, full_i: usize, full_j: usize) -> bool {
        match (self.local_of(full_i), self.local_of(full_j)) {
            (Some(li), Some(lj)) => self.reachable[li][lj],
            _ => false,
        }
    }

    pub fn measured(&self, full_i: usize, full_j: usize) -> Option<&[C64]> {
        self.m.get(full_i)?.get(full_j)?.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{VNACAL_MATCH, VNACAL_OPEN};

    #[test]
    fn through_is_reachable_both_ways() {
        let s = vec![vec![VNACAL_ZERO, VNACAL_MATCH], vec![VNACAL_MATCH, VNACAL_ZERO]];
        let m = vec![vec![None, None], vec![None, None]];
        let std = Standard::new(vec![0, 1], s, m);
        assert!(std.full_reachable(0, 1));
        assert!(std.full_reachable(1, 0));
        assert!(!std.full_reachable(0, 0));
    }

    #[test]
    fn reflect_has_no_cross_port_reachability() {
        let s = vec![vec![VNACAL_OPEN]];
        let m = vec![vec![None]];
        let std = Standard::new(vec![0], s, m);
        assert!(!std.full_reachable(0, 1));
    }

    #[test]
    fn double_reflect_ports_are_isolated() {
        let s = vec![vec![VNACAL_OPEN, VNACAL_ZERO], vec![VNACAL_ZERO, VNACAL_OPEN]];
        let m = vec![vec![None; 2]; 2];
        let std = Standard::new(vec![0, 1], s, m);
        assert!(!std.full_reachable(0, 1));
        assert!(!std.full_reachable(1, 0));
    }

    #[test]
    fn transitive_closure_through_intermediate_port() {
        // A 3-port standard connecting 0-1 and 1-2 should reach 0-2 transitively.
        let z = VNACAL_ZERO;
        let m_ = VNACAL_MATCH;
        let s = vec![vec![z, m_, z], vec![m_, z, m_], vec![z, m_, z]];
        let m = vec![vec![None; 3]; 3];
        let std = Standard::new(vec![0, 1, 2], s, m);
        assert!(std.full_reachable(0, 2));
        assert!(std.full_reachable(2, 0));
    }
}
