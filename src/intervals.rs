//! Loading of gene / intergene coordinate intervals.

use std::path::Path;

use crate::error::{Error, Result};

/// An inclusive `[start, stop]` interval in genome coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub stop: i64,
}

impl Interval {
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    pub fn contains(&self, x: i64) -> bool {
        self.start <= x && x <= self.stop
    }
}

// Fractional coordinates are truncated toward zero, so "10.5" is 10.
fn parse_coordinate(field: &str) -> Option<i64> {
    let field = field.trim();
    if let Ok(value) = field.parse::<i64>() {
        return Some(value);
    }
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value.trunc() as i64),
        _ => None,
    }
}

/// Read a headerless, two-column csv of numeric start/stop pairs.
/// Columns past the second are ignored.
pub fn read_intervals<P: AsRef<Path>>(path: P) -> Result<Vec<Interval>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rv = vec![];
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let error = |message: String| Error::Interval {
            path: path.display().to_string(),
            line,
            message,
        };
        // A trailing blank line shows up as a single empty field
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        if record.len() < 2 {
            return Err(error(format!(
                "expected two columns, found {}",
                record.len()
            )));
        }
        let start = parse_coordinate(&record[0])
            .ok_or_else(|| error(format!("start {:?} is not a number", &record[0])))?;
        let stop = parse_coordinate(&record[1])
            .ok_or_else(|| error(format!("stop {:?} is not a number", &record[1])))?;
        rv.push(Interval::new(start, stop));
    }
    Ok(rv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_two_columns() {
        let file = write_csv("0,99\n200,299\n");
        let intervals = read_intervals(file.path()).unwrap();
        assert_eq!(
            intervals,
            vec![Interval::new(0, 99), Interval::new(200, 299)]
        );
    }

    #[test]
    fn test_float_formatted_integers_and_extra_columns() {
        let file = write_csv("10.0, 20.0, gene_a\n30,40,gene_b\n");
        let intervals = read_intervals(file.path()).unwrap();
        assert_eq!(intervals, vec![Interval::new(10, 20), Interval::new(30, 40)]);
    }

    #[test]
    fn test_empty_file() {
        let file = write_csv("");
        assert!(read_intervals(file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_single_column_is_an_error() {
        let file = write_csv("0,10\n5\n");
        match read_intervals(file.path()) {
            Err(Error::Interval { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fractional_coordinates_are_truncated() {
        let file = write_csv("0,10.5\n20.9,-0.5\n");
        assert_eq!(
            read_intervals(file.path()).unwrap(),
            vec![Interval::new(0, 10), Interval::new(20, 0)]
        );
    }

    #[test]
    fn test_non_numeric_is_an_error() {
        for bad in ["0,ten\n", "0,nan\n", "inf,10\n", "0,-inf\n"] {
            let file = write_csv(bad);
            assert!(
                matches!(read_intervals(file.path()), Err(Error::Interval { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(read_intervals("/definitely/not/here.csv").is_err());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let i = Interval::new(5, 9);
        assert!(i.contains(5));
        assert!(i.contains(9));
        assert!(!i.contains(10));
        assert!(!i.contains(4));
    }
}
