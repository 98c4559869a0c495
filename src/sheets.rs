//! The external spreadsheet backend.
//!
//! Only the seam is modelled here: the gateway calls a [`SheetsBackend`] and
//! treats every error as an external failure. [`EmulatedSheets`] appends CSV
//! rows to local files instead of talking to a real spreadsheet API.

use crate::clock::SharedClock;
use crate::error::SheetsError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[async_trait]
pub trait SheetsBackend: Send + Sync {
    /// Append one order row. Returns a backend-specific receipt.
    async fn append_order_row(&self, order: &Value, staff: &Value) -> Result<Value, SheetsError>;

    /// Append one service-request row.
    async fn append_request_row(
        &self,
        request_text: &str,
        staff: &Value,
        created_at: &str,
    ) -> Result<Value, SheetsError>;
}

/// Writes rows to `<dir>/orders.csv` and `<dir>/requests.csv`.
#[derive(Debug)]
pub struct EmulatedSheets {
    dir: PathBuf,
    clock: SharedClock,
    write_lock: Mutex<()>,
}

impl EmulatedSheets {
    pub fn new(dir: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            dir: dir.into(),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn orders_file(&self) -> PathBuf {
        self.dir.join("orders.csv")
    }

    pub fn requests_file(&self) -> PathBuf {
        self.dir.join("requests.csv")
    }

    async fn append_line(&self, file: &Path, fields: &[String]) -> Result<Value, SheetsError> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .await?;
        handle.write_all(to_csv_line(fields).as_bytes()).await?;
        handle.flush().await?;
        Ok(json!({ "emulated": true, "file": file.display().to_string() }))
    }
}

#[async_trait]
impl SheetsBackend for EmulatedSheets {
    async fn append_order_row(&self, order: &Value, staff: &Value) -> Result<Value, SheetsError> {
        let row = order_row(order, staff, self.clock.now());
        self.append_line(&self.orders_file(), &row).await
    }

    async fn append_request_row(
        &self,
        request_text: &str,
        staff: &Value,
        created_at: &str,
    ) -> Result<Value, SheetsError> {
        let row = request_row(request_text, staff, created_at);
        self.append_line(&self.requests_file(), &row).await
    }
}

/// Render a JSON scalar as a cell. Null and missing become empty.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// First present value among `paths`, each a `/`-separated JSON pointer.
fn first_of<'a>(root: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|p| root.pointer(p))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
}

pub fn order_row(order: &Value, staff: &Value, now: DateTime<Utc>) -> Vec<String> {
    let o = |paths: &[&str]| cell(first_of(order, paths));
    let s = |path: &str| cell(staff.pointer(path));

    vec![
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
        o(&["/reception_date"]),
        o(&["/greeting_time"]),
        s("/display_name"),
        s("/district_code"),
        s("/department_code"),
        o(&["/customer/name"]),
        o(&["/customer/age"]),
        o(&["/customer/phone_fixed"]),
        o(&["/customer/phone_mobile"]),
        o(&["/items/0/product_name", "/product_name"]),
        o(&["/items/0/quantity", "/quantity"]),
        o(&["/items/0/unit", "/unit"]),
        o(&["/items/0/amount_ex_tax", "/amount_ex_tax"]),
        o(&["/contract_date"]),
        o(&["/construction/start_date", "/start_date"]),
        o(&["/construction/time_slot", "/time_slot"]),
        o(&["/construction/end_date", "/end_date"]),
        o(&["/payment_method"]),
        o(&["/reception_staff"]),
        o(&["/flyer"]),
        o(&["/estimate_no"]),
        o(&["/other_company"]),
        o(&["/history"]),
        o(&["/current"]),
        o(&["/total_history"]),
        o(&["/trigger"]),
        o(&["/remarks"]),
    ]
}

pub fn request_row(request_text: &str, staff: &Value, created_at: &str) -> Vec<String> {
    vec![
        created_at.to_string(),
        cell(staff.pointer("/district_code")),
        cell(staff.pointer("/department_code")),
        cell(staff.pointer("/display_name")),
        request_text.to_string(),
    ]
}

/// Join fields into one CSV line, quoting fields that contain `,` `"` or a newline.
pub fn to_csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::Arc;

    #[test]
    fn test_csv_quoting() {
        let fields = vec![
            "plain".to_string(),
            "a,b".to_string(),
            "say \"hi\"".to_string(),
            "two\nlines".to_string(),
            String::new(),
        ];
        assert_eq!(
            to_csv_line(&fields),
            "plain,\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\",\n"
        );
    }

    #[test]
    fn test_order_row_falls_back_to_top_level_fields() {
        let order = json!({
            "customer": { "name": "Sato", "age": 42 },
            "product_name": "Window film",
            "quantity": 3,
            "construction": { "start_date": "2024-07-01" },
            "end_date": "2024-07-02",
            "remarks": null
        });
        let staff = json!({ "display_name": "Tanaka", "district_code": "D1" });
        let now: DateTime<Utc> = "2024-06-01T09:00:00Z".parse().unwrap();

        let row = order_row(&order, &staff, now);
        assert_eq!(row.len(), 28);
        assert_eq!(row[0], "2024-06-01T09:00:00.000Z");
        assert_eq!(row[3], "Tanaka");
        assert_eq!(row[5], "");
        assert_eq!(row[6], "Sato");
        assert_eq!(row[7], "42");
        assert_eq!(row[10], "Window film");
        assert_eq!(row[11], "3");
        assert_eq!(row[15], "2024-07-01");
        assert_eq!(row[17], "2024-07-02");
        assert_eq!(row[27], "");
    }

    #[test]
    fn test_order_row_prefers_first_item() {
        let order = json!({
            "items": [{ "product_name": "Item A", "quantity": 1 }],
            "product_name": "Top level",
        });
        let row = order_row(&order, &json!({}), Utc::now());
        assert_eq!(row[10], "Item A");
        assert_eq!(row[11], "1");
    }

    #[tokio::test]
    async fn test_emulated_append() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = EmulatedSheets::new(dir.path().join("data"), Arc::new(MockClock::default()));
        let staff = json!({
            "display_name": "Kato",
            "district_code": "D2",
            "department_code": "S",
        });

        let receipt = sheets
            .append_request_row("Fix the door, please", &staff, "2024-06-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(receipt["emulated"], true);

        let content = std::fs::read_to_string(sheets.requests_file()).unwrap();
        assert_eq!(
            content,
            "2024-06-01T00:00:00Z,D2,S,Kato,\"Fix the door, please\"\n"
        );
    }
}
