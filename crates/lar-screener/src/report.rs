//! CSV input and output: URL lists, audit reports, score tables.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::audit::{ProductRecord, UrlTarget};

/// Errors reading or writing report files.
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    #[error("{path} has no {column} column")]
    MissingColumn { path: PathBuf, column: String },
}

impl ReportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether `value` is an http(s) URL worth auditing.
pub fn is_http_url(value: &str) -> bool {
    url::Url::parse(value.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Read audit targets from a plain list (one URL per line, `#` comments
/// allowed) or a CSV with a `url` column and optional `intent_id`.
///
/// Non-http values are dropped; duplicates are kept in order.
pub fn read_url_list(path: &Path) -> Result<Vec<UrlTarget>, ReportError> {
    let text = std::fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
    let text = text.trim_start_matches('\u{feff}');

    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let is_csv = header
        .split(',')
        .any(|h| h.trim().trim_matches('"').eq_ignore_ascii_case("url"));

    if !is_csv {
        return Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.starts_with('#') && is_http_url(l))
            .map(UrlTarget::new)
            .collect());
    }

    let table = Table::from_reader(text.as_bytes(), path)?;
    let url_col = table.require(&["url"], path)?;
    let intent_col = table.column(&["intent_id", "intent"]);

    Ok(table
        .rows
        .iter()
        .filter_map(|row| {
            let url = row.get(url_col)?.trim();
            is_http_url(url).then(|| UrlTarget {
                url: url.to_string(),
                intent_id: intent_col
                    .and_then(|c| row.get(c))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            })
        })
        .collect())
}

/// A loosely-typed CSV: headers plus raw rows, for tables whose column
/// names vary between sources.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<csv::StringRecord>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let file = std::fs::File::open(path).map_err(|e| ReportError::io(path, e))?;
        Self::from_reader(file, path)
    }

    fn from_reader<R: std::io::Read>(reader: R, path: &Path) -> Result<Self, ReportError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| ReportError::csv(path, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => tracing::debug!("{}: skipping row {}: {e}", path.display(), i + 2),
            }
        }
        Ok(Self { headers, rows })
    }

    /// Index of the first header matching any of `names`, case-insensitively.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        })
    }

    pub fn require(&self, names: &[&str], path: &Path) -> Result<usize, ReportError> {
        self.column(names).ok_or_else(|| ReportError::MissingColumn {
            path: path.to_path_buf(),
            column: names.join("|"),
        })
    }

    /// Non-blank cell text.
    pub fn cell<'a>(row: &'a csv::StringRecord, col: Option<usize>) -> Option<&'a str> {
        col.and_then(|c| row.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Write serialisable rows with a header, creating parent directories.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::io(parent, e))?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| ReportError::csv(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| ReportError::csv(path, e))?;
    }
    writer.flush().map_err(|e| ReportError::io(path, e))
}

/// Append rows, writing the header only when the file is new or empty.
pub fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::io(parent, e))?;
    }
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ReportError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(size == 0)
        .from_writer(file);
    for row in rows {
        writer.serialize(row).map_err(|e| ReportError::csv(path, e))?;
    }
    writer.flush().map_err(|e| ReportError::io(path, e))
}

/// Read typed rows, skipping (and logging) rows that do not deserialise.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ReportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ReportError::csv(path, e))?;

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => tracing::debug!("{}: skipping row {}: {e}", path.display(), i + 2),
        }
    }
    Ok(rows)
}

pub fn write_audit_report(path: &Path, records: &[ProductRecord]) -> Result<(), ReportError> {
    write_rows(path, records)
}

pub fn read_audit_report(path: &Path) -> Result<Vec<ProductRecord>, ReportError> {
    read_rows(path)
}

/// Round to two decimals for table output.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_plain_url_list() {
        let f = write_temp(
            "# retailers\nhttps://shop.se/p/1\n\nftp://shop.se/file\nnot a url\nhttp://shop.se/p/1\nhttps://shop.se/p/1\n",
        );
        let targets = read_url_list(f.path()).unwrap();
        let urls: Vec<&str> = targets.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://shop.se/p/1", "http://shop.se/p/1", "https://shop.se/p/1"]);
        assert!(targets.iter().all(|t| t.intent_id.is_none()));
    }

    #[test]
    fn test_csv_url_list_with_intents() {
        let f = write_temp("\u{feff}intent_id,brand,url\nI1,Acme,https://acme.se/p/9\nI2,Acme,\nI3,Acme,mailto:x@y.se\n,Beta,https://beta.se/p/1\n");
        let targets = read_url_list(f.path()).unwrap();
        assert_eq!(
            targets,
            vec![
                UrlTarget {
                    url: "https://acme.se/p/9".into(),
                    intent_id: Some("I1".into())
                },
                UrlTarget::new("https://beta.se/p/1"),
            ]
        );
    }

    #[test]
    fn test_audit_report_round_trip_uses_zero_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.csv");
        let record = ProductRecord {
            url: "https://shop.se/p/1".into(),
            server_jsonld: true,
            product_score: 75,
            rating_value: "4.2".into(),
            ..Default::default()
        };
        write_audit_report(&path, &[record.clone(), ProductRecord::failed("https://x.se", "boom")]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("url,server_jsonld,js_jsonld,has_product"));
        assert!(lines.next().unwrap().starts_with("https://shop.se/p/1,1,0,0"));

        let back = read_audit_report(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0], record);
        assert_eq!(back[1].error, "boom");
    }

    #[test]
    fn test_legacy_report_columns() {
        let f = write_temp(
            "url,server_jsonld,has_product,has_offer,identifiers,policies,specs_units,productgroup,product_score,family_score,error\n\
             https://a.se/p/1,1,1,1,1,1,0,0,85.0,0,\n\
             https://a.se/p/2,1,1,oops,1,1,0,0,85,0,\n",
        );
        let rows = read_audit_report(f.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_score, 85);
        assert!(rows[0].policies && !rows[0].policy_link);
    }

    #[test]
    fn test_append_writes_header_once() {
        #[derive(Serialize)]
        struct Row {
            a: u32,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.csv");
        append_rows(&path, &[Row { a: 1 }]).unwrap();
        append_rows(&path, &[Row { a: 2 }]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\n1\n2\n");
    }

    #[test]
    fn test_table_columns() {
        let f = write_temp("Domain,SOA\nshop.se,30\n");
        let table = Table::read(f.path()).unwrap();
        assert_eq!(table.column(&["key", "domain", "brand"]), Some(0));
        assert_eq!(table.column(&["value", "score", "soa"]), Some(1));
        assert!(table.require(&["sentiment"], f.path()).is_err());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(49.0), 49.0);
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(-3.333), -3.33);
    }
}
