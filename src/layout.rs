//! Layout descriptor.
//!
//! For a given (type, m_rows, m_columns) this describes the shape and
//! offsets of the error-term sub-blocks, which term is substituted as
//! the "unity" term in each sub-system's linear solve, whether the type
//! aggregates leakage terms outside the linear system, and how many
//! independent sub-systems the type decomposes into.
//!
//! Term-count formulas below are derived, not copied from a reference
//! implementation (none was available in this pack's `original_source/`,
//! see DESIGN.md): they are chosen so that the classic 2-port names
//! (T8, T16, TE10, UE14, E12) reproduce their textbook term counts at
//! `m_rows == m_columns == 2`, and generalize to higher port counts via
//! `ports = max(m_rows, m_columns)`. This is recorded as an Open Question
//! resolution in DESIGN.md.

use crate::error::{Result, UsageError};

/// The eight error-term model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalType {
    T8,
    U8,
    TE10,
    UE10,
    UE14,
    T16,
    U16,
    E12,
}

impl CalType {
    /// True for the types that aggregate off-diagonal, unreachable
    /// measurements into a leakage term outside the main linear system
    /// rather than solving for them directly.
    pub fn has_leakage(self) -> bool {
        matches!(self, CalType::TE10 | CalType::UE10 | CalType::UE14 | CalType::E12)
    }

    /// True for the "inverse" (U-parameter) forms, whose sub-blocks are
    /// named Um/Ui/Ux/Us rather than Ts/Ti/Tx/Tm.
    pub fn is_u_form(self) -> bool {
        matches!(self, CalType::U8 | CalType::UE10 | CalType::UE14 | CalType::U16)
    }

    /// The internal form actually assembled and solved; `E12` is never
    /// solved directly; it's produced by converting a solved `UE14`
    /// result, so its "solve type" is `UE14`.
    pub fn solve_type(self) -> CalType {
        match self {
            CalType::E12 => CalType::UE14,
            other => other,
        }
    }

    pub fn requires_ue14_conversion(self) -> bool {
        matches!(self, CalType::E12)
    }
}

/// Offsets (into the flat, per-sub-system error-term vector) of each
/// named sub-block, plus the index of the unity term within that vector.
#[derive(Debug, Clone, Copy)]
pub struct SubSystemLayout {
    /// Offset and length of the "Ts"/"Um" block (reflection/directivity).
    pub block_a: (usize, usize),
    /// Offset and length of the "Ti"/"Ui" block (source-match-like).
    pub block_b: (usize, usize),
    /// Offset and length of the "Tx"/"Ux" block (transmission tracking).
    pub block_c: (usize, usize),
    /// Offset and length of the "Tm"/"Us" extra scalar block (UE14 only;
    /// zero length for types without it).
    pub block_d: (usize, usize),
    /// Total terms solved for in this sub-system's linear system
    /// (excludes the unity term, which is substituted, not solved).
    pub unknowns: usize,
    /// Index, within the full per-sub-system term vector (including the
    /// unity term), of the unity term.
    pub unity_index: usize,
}

/// The full layout of a calibration type over a fixed port count.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub cal_type: CalType,
    pub m_rows: usize,
    pub m_columns: usize,
    /// Number of independent linear sub-systems: 1 for every type except
    /// UE14/E12, which have `m_columns`.
    pub sub_systems: usize,
    /// Per-sub-system layout (identical across sub-systems by symmetry).
    pub sub_system: SubSystemLayout,
    /// Number of leakage entries aggregated outside the linear system
    /// (0 for types without leakage).
    pub leakage_terms: usize,
}

impl Layout {
    pub fn new(cal_type: CalType, m_rows: usize, m_columns: usize) -> Result<Self> {
        if m_rows == 0 || m_columns == 0 {
            return Err(UsageError::DimensionMismatch {
                context: "Layout::new: m_rows and m_columns must be positive",
                expected: (1, 1),
                found: (m_rows, m_columns),
            }
            .into());
        }
        let solve_type = cal_type.solve_type();
        let ports = m_rows.max(m_columns);

        let sub_systems = if solve_type == CalType::UE14 { m_columns } else { 1 };

        let leakage_terms = if solve_type.has_leakage() || cal_type.has_leakage() {
            m_rows * m_columns - ports.min(m_rows).min(m_columns)
        } else {
            0
        };

        let sub_system = match solve_type {
            CalType::T8 | CalType::U8 => {
                // Ts/Um (ports), Ti/Ui (ports), Tx/Ux (ports*(ports-1)),
                // Tm/Us (ports, unity at local index 0 of this block).
                let a = (0, ports);
                let b = (a.0 + a.1, ports);
                let c = (b.0 + b.1, ports * (ports.saturating_sub(1)));
                let d = (c.0 + c.1, ports);
                let total = d.0 + d.1;
                SubSystemLayout { block_a: a, block_b: b, block_c: c, block_d: d, unknowns: total - 1, unity_index: d.0 }
            }
            CalType::T16 | CalType::U16 => {
                // Two independent T8-shaped blocks (forward/reverse),
                // doubling the T8 term count; no leakage, no skipped
                // equations.
                let half_a = (0, ports);
                let half_b = (half_a.0 + half_a.1, ports);
                let half_c = (half_b.0 + half_b.1, ports * (ports.saturating_sub(1)));
                let half_d = (half_c.0 + half_c.1, ports);
                let half_total = half_d.0 + half_d.1;
                // Mirror a second copy right after the first; `block_c`
                // in the public layout reports only the forward Tx block
                // (the reverse copy is implied by symmetry and walked by
                // the equation builder via `mirrored()`).
                let total = 2 * half_total;
                SubSystemLayout {
                    block_a: half_a,
                    block_b: half_b,
                    block_c: half_c,
                    block_d: half_d,
                    unknowns: total - 1,
                    unity_index: half_d.0,
                }
            }
            CalType::TE10 | CalType::UE10 => {
                // Ts/Um (ports), Ti/Ui (ports), Tm/Us (ports, holds the
                // unity term), Tx/Ux (ports*(ports-1)); leakage is outside.
                let a = (0, ports);
                let b = (a.0 + a.1, ports);
                let d = (b.0 + b.1, ports);
                let c = (d.0 + d.1, ports * (ports.saturating_sub(1)));
                let total = c.0 + c.1;
                SubSystemLayout { block_a: a, block_b: b, block_c: c, block_d: d, unknowns: total - 1, unity_index: d.0 }
            }
            CalType::UE14 => {
                // Per-column: Um(ports), Ui(ports), Ux(ports), Us(1).
                // Unity term lives inside Um at the position of this
                // column (recorded separately per sub-system index by the
                // caller; `unity_index` here is relative to block_a and
                // resolved per-column in `unity_index_for_column`).
                let a = (0, ports);
                let b = (a.0 + a.1, ports);
                let c = (b.0 + b.1, ports);
                let d = (c.0 + c.1, 1);
                let total = d.0 + d.1;
                SubSystemLayout { block_a: a, block_b: b, block_c: c, block_d: d, unknowns: total - 1, unity_index: 0 }
            }
            CalType::E12 => unreachable!("E12 solves via its UE14 solve_type"),
        };

        Ok(Layout { cal_type, m_rows, m_columns, sub_systems, sub_system, leakage_terms })
    }

    /// For UE14, the unity term of column `col`'s sub-system sits at
    /// `block_a.0 + col` ("um\[m_col\]" is the unity
    /// term of that column's sub-system).
    pub fn unity_index_for_column(&self, col: usize) -> usize {
        match self.cal_type.solve_type() {
            CalType::UE14 => self.sub_system.block_a.0 + col,
            _ => self.sub_system.unity_index,
        }
    }

    /// Total terms in the per-sub-system vector, including the unity term.
    pub fn terms_per_subsystem(&self) -> usize {
        self.sub_system.unknowns + 1
    }

    /// Total stored error terms across all sub-systems, for the
    /// *solved* (possibly UE14 intermediate) representation, plus
    /// leakage.
    pub fn total_solved_terms(&self) -> usize {
        self.sub_systems * self.terms_per_subsystem() + self.leakage_terms
    }

    /// Total stored error terms in the calibration's *public* type
    /// (E12 differs from its UE14 solve shape: 3 * ports per column).
    pub fn total_public_terms(&self) -> usize {
        if self.cal_type.requires_ue14_conversion() {
            let ports = self.m_rows.max(self.m_columns);
            self.m_columns * 3 * ports
        } else {
            self.total_solved_terms()
        }
    }
}
