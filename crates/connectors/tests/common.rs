use std::io::Write;

use ferry_common::config::{BindingConfig, FileFormat, TableSourceConfig};
use ferry_connectors::{ConnectorResponse, ResponseReceiver, WorkSignal};
use std::time::Duration;

/// Writes `status_codes` as a headed CSV file and returns the guard keeping it alive.
pub fn status_codes_csv() -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    writeln!(file, "id,label,sort")?;
    writeln!(file, "1,Active,10")?;
    writeln!(file, "2,Closed,20")?;
    writeln!(file, "3,Pending,30")?;
    file.flush()?;
    Ok(file)
}

pub fn file_binding(name: &str, path: &str, instances: usize) -> BindingConfig {
    BindingConfig {
        name: name.to_string(),
        connector_type: "file".to_string(),
        instances,
        tables: vec![TableSourceConfig {
            name: "status_codes".to_string(),
            path: path.to_string(),
            format: FileFormat::Csv,
            has_header: true,
        }],
    }
}

/// Waits for the next response on `rx`, failing the test after five seconds.
pub async fn next_response(signal: &WorkSignal, rx: &mut ResponseReceiver) -> ConnectorResponse {
    loop {
        if let Some(response) = rx.try_next() {
            return response;
        }
        tokio::time::timeout(Duration::from_secs(5), signal.notified())
            .await
            .expect("timed out waiting for the gateway");
    }
}
