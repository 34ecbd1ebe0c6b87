// crates/launchpad-core/src/frame.rs

use polars::prelude::*;

use crate::error::Result;

/// Collapse every flavour of missing value into polars' null.
///
/// CSV readers already produce null for empty cells, but floating point
/// columns can still carry NaN (a literal `NaN` in a file, or a database
/// driver reporting NaN). After this pass null is the only missing marker.
pub fn normalize_missing(df: DataFrame) -> Result<DataFrame> {
    let float_columns: Vec<Expr> = df
        .get_columns()
        .iter()
        .filter(|column| column.dtype().is_float())
        .map(|column| {
            let name = column.name().clone();
            when(col(name.clone()).is_nan())
                .then(lit(NULL))
                .otherwise(col(name.clone()))
                .alias(name)
        })
        .collect();

    if float_columns.is_empty() {
        return Ok(df);
    }

    Ok(df.lazy().with_columns(float_columns).collect()?)
}
