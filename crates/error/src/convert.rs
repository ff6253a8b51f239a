use crate::{ErrorCode, ErrorContext, FerryError};
use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;

impl From<DataFusionError> for FerryError {
    fn from(err: DataFusionError) -> Self {
        match &err {
            DataFusionError::SchemaError(schema_err, _) => match schema_err.as_ref() {
                datafusion::common::SchemaError::FieldNotFound {
                    field,
                    valid_fields,
                } => {
                    let available: Vec<String> =
                        valid_fields.iter().map(|f| f.name.clone()).collect();

                    let hint = closest_match(&field.name, &available);

                    let mut error = FerryError::new(
                        ErrorCode::FieldNotFound,
                        format!("Field '{}' not found", field.name),
                    )
                    .with_context(ErrorContext::FieldNotFound {
                        field: field.name.clone(),
                        table: field.relation.as_ref().map(|r| r.to_string()),
                        available_fields: available,
                    });

                    if let Some(closest) = hint {
                        error = error.with_hint(format!("Did you mean '{}'?", closest));
                    }
                    error
                }
                _ => FerryError::new(ErrorCode::DataFusionInternal, schema_err.to_string()),
            },
            DataFusionError::Plan(msg) => FerryError::new(ErrorCode::InvalidPlan, msg.clone()),
            DataFusionError::SQL(parse_err, _) => {
                FerryError::new(ErrorCode::InvalidPlan, parse_err.to_string())
            }
            DataFusionError::NotImplemented(msg) => {
                FerryError::new(ErrorCode::NotImplemented, msg.clone())
            }
            DataFusionError::External(inner) => match inner.downcast_ref::<FerryError>() {
                Some(ferry) => ferry.clone(),
                None => FerryError::new(ErrorCode::ConnectorFailure, inner.to_string()),
            },
            _ => FerryError::new(ErrorCode::DataFusionInternal, err.to_string()),
        }
    }
}

impl From<ArrowError> for FerryError {
    fn from(err: ArrowError) -> Self {
        match err {
            ArrowError::CastError(msg) => FerryError::new(ErrorCode::TypeMismatch, msg),
            other => FerryError::new(ErrorCode::DataFusionInternal, other.to_string()),
        }
    }
}

impl From<std::io::Error> for FerryError {
    fn from(err: std::io::Error) -> Self {
        FerryError::new(ErrorCode::ConnectorFailure, err.to_string())
    }
}

impl From<serde_json::Error> for FerryError {
    fn from(err: serde_json::Error) -> Self {
        FerryError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

/// Levenshtein-based suggestion used for "did you mean" hints.
///
/// Returns `None` when nothing is within an edit distance of 3.
pub fn closest_match(target: &str, options: &[String]) -> Option<String> {
    let mut best_match: Option<&str> = None;
    let mut min_distance = usize::MAX;

    for option in options {
        let distance = levenshtein(target, option);
        if distance < min_distance && distance <= 3 {
            min_distance = distance;
            best_match = Some(option.as_str());
        }
    }

    best_match.map(|s| s.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0; b.len() + 1]; a.len() + 1];

    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in dp[0].iter_mut().enumerate() {
        *val = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = std::cmp::min(
                std::cmp::min(dp[i - 1][j] + 1, dp[i][j - 1] + 1),
                dp[i - 1][j - 1] + cost,
            );
        }
    }

    dp[a.len()][b.len()]
}
