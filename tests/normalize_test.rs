use anyhow::Result;
use ceap_pipeline::error::PipelineError;
use ceap_pipeline::process::Processor;
use ceap_pipeline::schema::{ExpenseRecord, CANONICAL_COLUMNS, PROCESSED_FILE_NAME, SENTINEL_UNKNOWN};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const RAW_HEADER: &str =
    "ano,mes,tipoDespesa,valorDocumento,dataDocumento,nomeDeputado,siglaPartido,siglaUf,idDeputado";

fn write_raw(dir: &Path, name: &str, rows: &[&str]) {
    let mut content = String::from(RAW_HEADER);
    for row in rows {
        content.push('\n');
        content.push_str(row);
    }
    content.push('\n');
    fs::write(dir.join(name), content).unwrap();
}

fn read_records(path: &Path) -> Vec<ExpenseRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.deserialize().map(|r| r.unwrap()).collect()
}

#[test]
fn merges_months_and_removes_exact_duplicates() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    let row_a = "2024,1,Telefonia,150.75,2024-01-15T00:00:00,Fulano,XX,SP,204554";
    let row_b = "2024,1,Correios,20.00,2024-01-20T00:00:00,Beltrano,YY,RJ,204555";
    let row_c = "2024,2,Telefonia,99.10,2024-02-03T00:00:00,Fulano,XX,SP,204554";

    // row_a appears twice in January and once more in February
    write_raw(&raw, "deputy_expenses_2024_01.csv", &[row_a, row_b, row_a]);
    write_raw(&raw, "deputy_expenses_2024_02.csv", &[row_a, row_c]);

    let processed = dir.path().join("processed");
    let report = Processor::new(&raw, &processed).run()?;

    assert_eq!(report.files_read, 2);
    assert_eq!(report.rows_read, 5);
    assert_eq!(report.duplicates_removed, 2);
    assert_eq!(report.rows_written, 3);

    let records = read_records(&processed.join(PROCESSED_FILE_NAME));
    let names: Vec<&str> = records.iter().map(|r| r.nome_deputado.as_str()).collect();
    // first-occurrence order is preserved
    assert_eq!(names, vec!["Fulano", "Beltrano", "Fulano"]);
    Ok(())
}

#[test]
fn differently_written_amounts_are_not_duplicates() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    // same expense, amount written with a trailing zero in the second row
    write_raw(
        &raw,
        "deputy_expenses_2024_01.csv",
        &[
            "2024,1,Telefonia,150.75,2024-01-15T00:00:00,Fulano,XX,SP,204554",
            "2024,1,Telefonia,150.750,2024-01-15T00:00:00,Fulano,XX,SP,204554",
        ],
    );

    let processed = dir.path().join("processed");
    let report = Processor::new(&raw, &processed).run()?;
    assert_eq!(report.duplicates_removed, 0);
    assert_eq!(report.rows_written, 2);
    Ok(())
}

#[test]
fn non_numeric_amount_drops_exactly_that_row() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    write_raw(
        &raw,
        "deputy_expenses_2024_01.csv",
        &[
            "2024,1,Telefonia,150.75,2024-01-15T00:00:00,Fulano,XX,SP,204554",
            "2024,1,Telefonia,abc,2024-01-16T00:00:00,Beltrano,YY,RJ,204555",
            "2024,1,Correios,200.00,2024-01-17T00:00:00,Sicrano,ZZ,MG,204556",
        ],
    );

    let processed = dir.path().join("processed");
    let report = Processor::new(&raw, &processed).run()?;

    assert_eq!(report.rows_dropped_bad_amount, 1);
    assert_eq!(report.rows_written, 2);

    let records = read_records(&processed.join(PROCESSED_FILE_NAME));
    assert_eq!(records[0].valor_documento, 150.75);
    assert_eq!(records[1].valor_documento, 200.00);
    assert!(records.iter().all(|r| r.nome_deputado != "Beltrano"));
    Ok(())
}

#[test]
fn unparseable_dates_are_dropped_and_counted() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    write_raw(
        &raw,
        "deputy_expenses_2024_01.csv",
        &[
            "2024,1,Telefonia,10.00,31/01/2024,Fulano,XX,SP,204554",
            "2024,1,Telefonia,20.00,,Fulano,XX,SP,204554",
            "2024,1,Telefonia,30.00,2024-01-31T00:00:00,Fulano,XX,SP,204554",
        ],
    );

    let processed = dir.path().join("processed");
    let report = Processor::new(&raw, &processed).run()?;

    assert_eq!(report.rows_dropped_bad_date, 2);
    assert_eq!(report.rows_written, 1);
    let records = read_records(&processed.join(PROCESSED_FILE_NAME));
    assert_eq!(records[0].valor_documento, 30.00);
    Ok(())
}

#[test]
fn typed_columns_and_sentinels_in_the_output() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    write_raw(
        &raw,
        "deputy_expenses_2024_01.csv",
        &["2024,1,,55.20,2024-01-15T10:30:00,Fulano,,,204554"],
    );

    let processed = dir.path().join("processed");
    Processor::new(&raw, &processed).run()?;

    let records = read_records(&processed.join(PROCESSED_FILE_NAME));
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.ano, 2024);
    assert_eq!(record.mes, 1);
    assert_eq!(record.id_deputado, 204554);
    assert_eq!(record.tipo_despesa, SENTINEL_UNKNOWN);
    assert_eq!(record.partido, SENTINEL_UNKNOWN);
    assert_eq!(record.uf, SENTINEL_UNKNOWN);
    // the day column is the document timestamp's calendar date
    assert_eq!(record.data, record.data_documento.date());
    assert_eq!(record.data.to_string(), "2024-01-15");
    Ok(())
}

#[test]
fn missing_raw_column_fails_loudly() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    // header lacks siglaUf and idDeputado
    let content = "ano,mes,tipoDespesa,valorDocumento,dataDocumento,nomeDeputado,siglaPartido\n\
                   2024,1,Telefonia,10.00,2024-01-15T00:00:00,Fulano,XX\n";
    fs::write(raw.join("deputy_expenses_2024_01.csv"), content)?;

    let processed = dir.path().join("processed");
    let err = Processor::new(&raw, &processed).run().unwrap_err();
    match err {
        PipelineError::Schema { file, missing } => {
            assert_eq!(file, "deputy_expenses_2024_01.csv");
            assert_eq!(missing, vec!["siglaUf", "idDeputado"]);
        }
        other => panic!("expected schema error, got {other}"),
    }
    // nothing is written when the contract is violated
    assert!(!processed.join(PROCESSED_FILE_NAME).exists());
    Ok(())
}

#[test]
fn rerunning_on_unchanged_input_is_byte_identical() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    write_raw(
        &raw,
        "deputy_expenses_2024_01.csv",
        &[
            "2024,1,Telefonia,150.75,2024-01-15T00:00:00,Fulano,XX,SP,204554",
            "2024,1,Correios,20.00,2024-01-20T00:00:00,Beltrano,YY,RJ,204555",
        ],
    );
    write_raw(
        &raw,
        "deputy_expenses_2024_02.csv",
        &["2024,2,Telefonia,99.10,2024-02-03T00:00:00,Fulano,XX,SP,204554"],
    );

    let processed = dir.path().join("processed");
    let output = processed.join(PROCESSED_FILE_NAME);

    Processor::new(&raw, &processed).run()?;
    let first = fs::read(&output)?;
    Processor::new(&raw, &processed).run()?;
    let second = fs::read(&output)?;

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn all_rows_dropped_still_writes_the_header() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;

    write_raw(
        &raw,
        "deputy_expenses_2024_01.csv",
        &["2024,1,Telefonia,not-a-number,bad-date,Fulano,XX,SP,204554"],
    );

    let processed = dir.path().join("processed");
    let report = Processor::new(&raw, &processed).run()?;
    assert_eq!(report.rows_written, 0);

    let content = fs::read_to_string(processed.join(PROCESSED_FILE_NAME))?;
    let header = content.lines().next().unwrap();
    assert_eq!(header, CANONICAL_COLUMNS.join(","));
    Ok(())
}

#[test]
fn empty_raw_directory_produces_no_output() -> Result<()> {
    let dir = tempdir()?;
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw)?;
    let processed = dir.path().join("processed");

    let report = Processor::new(&raw, &processed).run()?;
    assert_eq!(report.files_read, 0);
    assert_eq!(report.rows_written, 0);
    assert!(!processed.join(PROCESSED_FILE_NAME).exists());
    Ok(())
}
