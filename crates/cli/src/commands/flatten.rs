//! Offline flattening of a saved pricing response.

use anyhow::{bail, Context, Result};
use clap::Args;
use ice_risk_data::{flatten_response, CsvStorage};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Clone)]
pub struct FlattenArgs {
    /// JSON response file
    #[arg(long)]
    pub response: PathBuf,

    /// JSON array of the request's instruments, joined on `id` = `ID`
    #[arg(long)]
    pub instruments: Option<PathBuf>,

    /// Output CSV (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Runs the flatten command.
///
/// # Errors
/// Returns an error if an input cannot be read or the response has no instruments.
pub fn run_flatten(args: FlattenArgs) -> Result<()> {
    let response = read_json(&args.response)?;
    let instruments = match &args.instruments {
        Some(path) => instrument_list(read_json(path)?)
            .with_context(|| format!("Invalid instruments in {}", path.display()))?,
        None => Vec::new(),
    };

    let response = (!response.is_null()).then_some(response);
    let table = flatten_response(response.as_ref(), &instruments)?;

    match &args.output {
        Some(path) => {
            CsvStorage::write_table(path, &table)?;
            tracing::info!(rows = table.height(), path = %path.display(), "Wrote flattened table");
        }
        None => CsvStorage::write_table_to(std::io::stdout().lock(), &table)?,
    }

    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn instrument_list(value: Value) -> Result<Vec<Map<String, Value>>> {
    let Value::Array(items) = value else {
        bail!("expected a JSON array of objects");
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map),
            _ => bail!("instrument {index} is not an object"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_flatten_to_csv() {
        let dir = TempDir::new().unwrap();
        let response = dir.path().join("response.json");
        let instruments = dir.path().join("instruments.json");
        let output = dir.path().join("out").join("prices.csv");

        fs::write(
            &response,
            json!({"instruments": [
                {"id": 1, "results": [{"code": "price", "value": 10.5, "currency": "EUR"}]}
            ]})
            .to_string(),
        )
        .unwrap();
        fs::write(&instruments, json!([{"ID": 1, "pair": "EURUSD"}]).to_string()).unwrap();

        run_flatten(FlattenArgs {
            response,
            instruments: Some(instruments),
            output: Some(output.clone()),
        })
        .unwrap();

        let csv = fs::read_to_string(output).unwrap();
        assert_eq!(csv, "id,price,price_currency,pair\n1,10.5,EUR,EURUSD\n");
    }

    #[test]
    fn test_null_response_is_empty_result() {
        let dir = TempDir::new().unwrap();
        let response = dir.path().join("response.json");
        fs::write(&response, "null").unwrap();

        let err = run_flatten(FlattenArgs {
            response,
            instruments: None,
            output: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("empty result"));
    }

    #[test]
    fn test_instrument_list_rejects_scalars() {
        assert!(instrument_list(json!([{"ID": 1}, 2])).is_err());
        assert!(instrument_list(json!({"ID": 1})).is_err());
        assert_eq!(instrument_list(json!([])).unwrap().len(), 0);
    }
}
