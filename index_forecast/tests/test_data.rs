use index_forecast::data::{DataLoader, TimeSeriesData};
use index_math::Month;
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

fn m(s: &str) -> Month {
    s.parse().unwrap()
}

#[test]
fn test_data_loader_from_csv() {
    // Create a temporary CSV file
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "month,value").unwrap();
    writeln!(file, "2023-02,101.5").unwrap();
    writeln!(file, "2023M01,100.0").unwrap();
    writeln!(file, "2023-03,103.0").unwrap();

    let data = DataLoader::from_csv(file.path()).unwrap();

    assert_eq!(data.len(), 3);
    assert_eq!(data.months(), vec![m("2023-01"), m("2023-02"), m("2023-03")]);
    assert_eq!(data.values(), vec![100.0, 101.5, 103.0]);
}

#[test]
fn test_data_loader_skips_bad_rows_and_keeps_last_duplicate() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "month,value,note").unwrap();
    writeln!(file, "2023-01,100.0,first").unwrap();
    writeln!(file, "not-a-month,5.0,junk").unwrap();
    writeln!(file, "2023-02,.,missing").unwrap();
    writeln!(file, "2023-01,99.0,revised").unwrap();

    let data = DataLoader::from_csv(file.path()).unwrap();

    assert_eq!(data.len(), 1);
    assert_eq!(data.value_at(m("2023-01")), Some(99.0));
}

#[test]
fn test_data_loader_error_handling() {
    // Test with non-existent file
    let result = DataLoader::from_csv("nonexistent_file.csv");
    assert!(result.is_err());

    // Test with missing columns
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,close").unwrap();
    writeln!(file, "2023-01-01,1.0").unwrap();

    let result = DataLoader::from_csv(file.path());
    assert!(result.is_err());
}

#[test]
fn test_time_series_data_operations() {
    let data = TimeSeriesData::new(vec![
        (m("2023-01"), 100.0),
        (m("2023-02"), 103.0),
        (m("2023-03"), 106.0),
    ])
    .unwrap();

    assert_eq!(data.len(), 3);
    assert!(!data.is_empty());

    assert_eq!(data.first().unwrap().month, m("2023-01"));
    assert_eq!(data.last().unwrap().value, 106.0);
    assert_eq!(data.values(), vec![100.0, 103.0, 106.0]);
}
