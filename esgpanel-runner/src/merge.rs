//! Combine per-instrument historic panels with the static table.

use esgpanel_core::{JoinValidation, PanelKey, Table, TableError, ValidationError};
use std::collections::BTreeMap;
use std::fmt;

/// A gap in the combined panel that does not exclude the instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletenessWarning {
    /// The instrument has historic data but no static row.
    MissingStatic { instrument: String },
}

impl fmt::Display for CompletenessWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletenessWarning::MissingStatic { instrument } => {
                write!(f, "{instrument}: no static data, static columns left missing")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub combined: Table<PanelKey>,
    pub warnings: Vec<CompletenessWarning>,
    /// Instruments excluded because their panel could not be joined.
    pub failures: Vec<ValidationError>,
}

/// Left-join every historic panel with its instrument's static row and stack
/// the results.
///
/// Column order is every historic column (in order of first appearance over
/// instruments in ascending order) followed by every static column, so the
/// layout only depends on the inputs.
pub fn join(
    static_data: &Table<String>,
    historic: &BTreeMap<String, Table<PanelKey>>,
) -> Result<MergeOutcome, TableError> {
    let mut warnings = Vec::new();
    let mut failures = Vec::new();
    let mut joined = Vec::with_capacity(historic.len());

    for (instrument, panel) in historic {
        if static_data.get(instrument).is_none() {
            tracing::warn!(%instrument, "no static data for instrument");
            warnings.push(CompletenessWarning::MissingStatic {
                instrument: instrument.clone(),
            });
        }

        match panel.left_join(static_data, JoinValidation::ManyToOne) {
            Ok(table) => joined.push(table),
            Err(TableError::ColumnOverlap(columns)) => {
                tracing::error!(%instrument, ?columns, "static and historic columns collide");
                failures.push(ValidationError::DuplicateColumns {
                    instrument: instrument.clone(),
                    columns,
                });
            }
            Err(source) => {
                tracing::error!(%instrument, error = %source, "join with static data failed");
                failures.push(ValidationError::Table {
                    instrument: instrument.clone(),
                    source,
                });
            }
        }
    }

    let mut layout: Vec<String> = Vec::new();
    for panel in historic.values() {
        for name in panel.columns() {
            if !layout.contains(&name) && static_data.column_index(&name).is_none() {
                layout.push(name);
            }
        }
    }
    layout.extend(static_data.columns());

    let combined = Table::concat(std::iter::once(Table::new(layout)?).chain(joined))?;

    tracing::info!(
        instruments = historic.len() - failures.len(),
        rows = combined.len(),
        columns = combined.width(),
        "combined panel built"
    );

    Ok(MergeOutcome {
        combined,
        warnings,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use esgpanel_core::{Cell, Value};

    fn panel(instrument: &str, columns: &[&str], years: std::ops::RangeInclusive<i32>) -> Table<PanelKey> {
        Table::with_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            years.map(|y| {
                (
                    PanelKey::new(instrument, y),
                    columns.iter().map(|_| Some(Value::Number(y as f64))).collect::<Vec<Cell>>(),
                )
            }),
        )
        .unwrap()
    }

    fn statics() -> Table<String> {
        Table::with_rows(
            vec!["Name".into(), "Country".into()],
            [
                ("A".to_string(), vec![Some(Value::Text("Alpha".into())), None]),
                ("B".to_string(), vec![Some(Value::Text("Beta".into())), Some(Value::Text("US".into()))]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn every_panel_row_gets_its_static_values() {
        let mut historic = BTreeMap::new();
        historic.insert("A".to_string(), panel("A", &["Score"], 2020..=2022));
        historic.insert("B".to_string(), panel("B", &["Score"], 2020..=2022));

        let out = join(&statics(), &historic).unwrap();
        assert!(out.warnings.is_empty());
        assert!(out.failures.is_empty());
        assert_eq!(out.combined.len(), 6);
        assert_eq!(out.combined.columns(), ["Score", "Name", "Country"]);
        for year in 2020..=2022 {
            assert_eq!(
                out.combined.cell(&PanelKey::new("B", year), "Country"),
                Some(Some(Value::Text("US".into())))
            );
        }
    }

    #[test]
    fn missing_static_row_is_a_warning_not_a_failure() {
        let mut historic = BTreeMap::new();
        historic.insert("C".to_string(), panel("C", &["Score"], 2020..=2021));

        let out = join(&statics(), &historic).unwrap();
        assert_eq!(
            out.warnings,
            vec![CompletenessWarning::MissingStatic {
                instrument: "C".into()
            }]
        );
        assert_eq!(out.combined.len(), 2);
        assert_eq!(out.combined.cell(&PanelKey::new("C", 2020), "Name"), Some(None));
    }

    #[test]
    fn column_collision_excludes_only_that_instrument() {
        let mut historic = BTreeMap::new();
        historic.insert("A".to_string(), panel("A", &["Score", "Name"], 2020..=2020));
        historic.insert("B".to_string(), panel("B", &["Score"], 2020..=2020));

        let out = join(&statics(), &historic).unwrap();
        assert_eq!(
            out.failures,
            vec![ValidationError::DuplicateColumns {
                instrument: "A".into(),
                columns: vec!["Name".into()],
            }]
        );
        assert_eq!(out.combined.keys().cloned().collect::<Vec<_>>(), [PanelKey::new("B", 2020)]);
    }

    #[test]
    fn historic_columns_precede_static_columns_across_instruments() {
        let mut historic = BTreeMap::new();
        historic.insert("A".to_string(), panel("A", &["Score"], 2020..=2020));
        historic.insert("B".to_string(), panel("B", &["Emissions"], 2020..=2020));

        let out = join(&statics(), &historic).unwrap();
        assert_eq!(out.combined.columns(), ["Score", "Emissions", "Name", "Country"]);
        assert_eq!(out.combined.cell(&PanelKey::new("A", 2020), "Emissions"), Some(None));
    }
}
