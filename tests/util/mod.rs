use poct_audit::model::{EventLog, RawTable};
use std::path::PathBuf;
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Builder for device-log fixtures. Rows are added in order; optional fields
/// left blank become absent values.
#[allow(dead_code)]
#[derive(Default)]
pub struct LogFixture {
    rows: Vec<[String; 5]>,
}

#[allow(dead_code)]
impl LogFixture {
    pub const COLUMNS: [&'static str; 5] =
        ["Timestamp", "Operator_ID", "Device_ID", "Barcode", "Location"];

    pub fn new() -> Self {
        Self::default()
    }

    /// A test by `operator` on `device` at `ts`.
    pub fn test(self, ts: &str, operator: &str, device: &str) -> Self {
        self.row(ts, operator, device, "", "")
    }

    pub fn scan(self, ts: &str, operator: &str, device: &str, barcode: &str) -> Self {
        self.row(ts, operator, device, barcode, "")
    }

    pub fn row(mut self, ts: &str, operator: &str, device: &str, barcode: &str, location: &str) -> Self {
        self.rows.push([
            ts.to_string(),
            operator.to_string(),
            device.to_string(),
            barcode.to_string(),
            location.to_string(),
        ]);
        self
    }

    pub fn table(&self) -> RawTable {
        let mut table = RawTable::new(Self::COLUMNS.iter().map(|c| c.to_string()).collect());
        for row in &self.rows {
            table.push_row(Self::COLUMNS.iter().copied().zip(row.iter().cloned()));
        }
        table
    }

    pub fn log(&self) -> EventLog {
        EventLog::build(&self.table()).expect("valid fixture")
    }

    /// The rows as a JSON array, as the CLI reads them.
    pub fn json(&self) -> String {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut map = serde_json::Map::new();
                for (column, value) in Self::COLUMNS.iter().zip(row) {
                    if !value.is_empty() {
                        map.insert(column.to_string(), serde_json::Value::String(value.clone()));
                    }
                }
                serde_json::Value::Object(map)
            })
            .collect();
        serde_json::to_string(&rows).expect("serialize fixture")
    }
}

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Write `contents` to `name` inside the directory and return its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }
}
