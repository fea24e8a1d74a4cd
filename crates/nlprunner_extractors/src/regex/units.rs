//! Static unit-normalization table (spec.md §9 open question #2: unit
//! normalisation resolved as a static data table rather than a pluggable
//! units engine, tested against the worked examples of spec.md §8).

/// One recognized unit alias for a variable, with its multiplicative factor
/// relative to that variable's canonical unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitDef {
    pub alias: &'static str,
    /// Multiply a value in `alias` units by this factor to get the
    /// canonical unit's value.
    pub factor_to_canonical: f64,
}

/// `variable_name` -> (canonical unit, recognized aliases).
pub struct UnitTable {
    pub variable_name: &'static str,
    pub canonical_unit: &'static str,
    pub units: &'static [UnitDef],
}

/// CRP is documented in mg/L in the destination; mg/dL is the common
/// alternate charting unit (1 mg/dL = 10 mg/L).
pub const CRP_UNITS: UnitTable = UnitTable {
    variable_name: "crp",
    canonical_unit: "mg/L",
    units: &[
        UnitDef { alias: "mg/l", factor_to_canonical: 1.0 },
        UnitDef { alias: "mg/dl", factor_to_canonical: 10.0 },
    ],
};

/// Sodium is documented in mmol/L; mEq/L is numerically identical for a
/// monovalent ion so the factor is 1.0, but it's still a distinct alias
/// operators may chart in.
pub const SODIUM_UNITS: UnitTable = UnitTable {
    variable_name: "sodium",
    canonical_unit: "mmol/L",
    units: &[
        UnitDef { alias: "mmol/l", factor_to_canonical: 1.0 },
        UnitDef { alias: "meq/l", factor_to_canonical: 1.0 },
    ],
};

pub const ALL_TABLES: &[&UnitTable] = &[&CRP_UNITS, &SODIUM_UNITS];

impl UnitTable {
    /// Convert `value`, given in `unit`, to the canonical unit. Unit
    /// matching is case-insensitive and ignores surrounding whitespace.
    /// Returns `None` for an unrecognized alias so callers can decide
    /// whether to reject the value or pass it through unconverted.
    pub fn convert(&self, value: f64, unit: &str) -> Option<f64> {
        let needle = unit.trim().to_ascii_lowercase();
        self.units
            .iter()
            .find(|u| u.alias == needle)
            .map(|u| value * u.factor_to_canonical)
    }

    pub fn is_canonical(&self, unit: &str) -> bool {
        unit.trim().eq_ignore_ascii_case(self.canonical_unit)
    }
}

pub fn table_for(variable_name: &str) -> Option<&'static UnitTable> {
    ALL_TABLES
        .iter()
        .copied()
        .find(|t| t.variable_name.eq_ignore_ascii_case(variable_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_crp_mg_dl_to_mg_l() {
        // spec.md §8 worked example: "CRP 4.5 mg/dL" -> 45 mg/L.
        let converted = CRP_UNITS.convert(4.5, "mg/dL").unwrap();
        assert!((converted - 45.0).abs() < 1e-9);
    }

    #[test]
    fn crp_mg_l_passes_through_unchanged() {
        let converted = CRP_UNITS.convert(45.0, "mg/L").unwrap();
        assert!((converted - 45.0).abs() < 1e-9);
    }

    #[test]
    fn unrecognized_unit_returns_none() {
        assert!(CRP_UNITS.convert(45.0, "furlongs").is_none());
    }

    #[test]
    fn lookup_by_variable_name_is_case_insensitive() {
        assert!(table_for("CRP").is_some());
        assert!(table_for("unknown_var").is_none());
    }

    #[test]
    fn sodium_meq_and_mmol_are_numerically_equal() {
        assert_eq!(SODIUM_UNITS.convert(140.0, "mEq/L"), SODIUM_UNITS.convert(140.0, "mmol/L"));
    }
}
