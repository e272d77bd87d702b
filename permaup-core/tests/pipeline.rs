use permaup_core::manifest::{ManifestReader, AR_HASH_COL};
use permaup_core::pipeline::{Pipeline, PipelineConfig, RowStatus};
use permaup_core::retry::RetryPolicy;
use permaup_core::transport::{Fault, MemoryTransport};
use permaup_core::tx::{ipfs_link, IPFS_CONSTRAINT, IPFS_CONSTRAINT_KEY, IPFS_KEY};
use permaup_core::wallet::Wallet;
use permaup_core::Error;
use std::fs;
use std::path::Path;

fn config(upload_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        upload_dir: upload_dir.to_path_buf(),
        chunk_size: 1024,
        retry: RetryPolicy::immediate(3, 3),
        ..PipelineConfig::default()
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(path).unwrap();
    rdr.records().map(|r| r.unwrap().iter().map(str::to_string).collect()).collect()
}

#[test]
fn three_row_scenario() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    let payload: Vec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
    fs::write(upload.join("c.png"), &payload).unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "filename,ipfs,arHash\na.png,,ABC\nghost.png,,\nc.png,QmXYZ,\n").unwrap();
    let output = td.path().join("output-list.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let report = Pipeline::new(&wallet, &net, config(&upload)).run(&input, &output).unwrap();

    assert_eq!(report.rows, 3);
    assert_eq!(report.already_uploaded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.uploaded, 1);
    assert!(matches!(report.outcomes[1].status, RowStatus::Skipped { ref reason } if reason.contains("ghost.png")));

    let rows = read_rows(&output);
    assert_eq!(rows[0], vec!["filename", "ipfs", "arHash"]);
    assert_eq!(rows[1], vec!["a.png", "", "ABC"]);
    assert_eq!(rows[2], vec!["ghost.png", "", ""]);
    assert_eq!(rows[3][0], "c.png");
    let new_id = rows[3][2].clone();
    assert!(!new_id.is_empty());

    let headers = net.headers();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].id, new_id);
    let tag = |name: &str| headers[0].tags.iter().find(|t| t.name == name).map(|t| t.value.clone());
    assert_eq!(tag(IPFS_KEY).as_deref(), Some("QmXYZ"));
    assert_eq!(tag(IPFS_CONSTRAINT_KEY).as_deref(), Some(IPFS_CONSTRAINT));
    assert_eq!(tag("Content-Type").as_deref(), Some("image/png"));
    assert_eq!(net.stored_data(&new_id).unwrap(), payload);
}

#[test]
fn missing_input_fails_before_writing_output() {
    let td = tempfile::tempdir().unwrap();
    let output = td.path().join("out.csv");
    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let err = Pipeline::new(&wallet, &net, config(td.path()))
        .run(&td.path().join("list.csv"), &output)
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
    assert!(!output.exists());
}

#[test]
fn extra_columns_pass_through_and_ar_hash_is_appended() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(upload.join("notes.txt"), b"some notes").unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "title,filename,ipfs\nFirst,notes.txt,\nSecond,,\n").unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let report = Pipeline::new(&wallet, &net, config(&upload)).run(&input, &output).unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.skipped, 1);

    let rows = read_rows(&output);
    assert_eq!(rows[0], vec!["title", "filename", "ipfs", AR_HASH_COL]);
    assert_eq!(rows[1][..3], ["First", "notes.txt", ""]);
    assert!(!rows[1][3].is_empty());
    assert_eq!(rows[2], vec!["Second", "", "", ""]);
    // no IPFS id, so no link tags
    assert!(net.headers()[0].tags.iter().all(|t| t.name != IPFS_KEY && t.name != IPFS_CONSTRAINT_KEY));
}

#[test]
fn aborted_upload_leaves_row_without_id_and_continues() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(upload.join("a.bin"), vec![1u8; 10]).unwrap();
    fs::write(upload.join("b.bin"), vec![2u8; 10]).unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "filename\na.bin\nb.bin\n").unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    net.fail_next_chunks(std::iter::repeat(Fault::Reject("bad chunk".into())).take(3));
    let report = Pipeline::new(&wallet, &net, config(&upload)).run(&input, &output).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.uploaded, 1);

    let rows = read_rows(&output);
    assert_eq!(rows[1], vec!["a.bin", ""]);
    assert_eq!(rows[2][0], "b.bin");
    assert!(!rows[2][1].is_empty());
}

#[test]
fn traversal_outside_upload_dir_is_skipped() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(td.path().join("secret.txt"), b"nope").unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "filename\n../secret.txt\n").unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let report = Pipeline::new(&wallet, &net, config(&upload)).run(&input, &output).unwrap();
    assert_eq!(report.skipped, 1);
    assert!(net.headers().is_empty());
}

#[test]
fn check_remote_reuses_existing_upload() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(upload.join("c.png"), b"png bytes").unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "filename,ipfs\nc.png,QmKnown\n").unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    net.insert_known(ipfs_link("QmKnown").to_vec(), "EXISTING");
    let cfg = PipelineConfig { check_remote: true, ..config(&upload) };
    let report = Pipeline::new(&wallet, &net, cfg).run(&input, &output).unwrap();
    assert_eq!(report.found_remote, 1);
    assert!(net.headers().is_empty());
    assert_eq!(read_rows(&output)[1], vec!["c.png", "QmKnown", "EXISTING"]);
}

#[test]
fn parallel_jobs_keep_input_order() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    let mut csv = String::from("filename\n");
    for i in 0..9 {
        let name = format!("f{i}.bin");
        fs::write(upload.join(&name), vec![i as u8; 2500 + i * 100]).unwrap();
        csv.push_str(&name);
        csv.push('\n');
    }
    let input = td.path().join("list.csv");
    fs::write(&input, csv).unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let cfg = PipelineConfig { jobs: 4, ..config(&upload) };
    let report = Pipeline::new(&wallet, &net, cfg).run(&input, &output).unwrap();
    assert_eq!(report.uploaded, 9);

    let rows = read_rows(&output);
    for i in 0..9 {
        let row = &rows[i + 1];
        assert_eq!(row[0], format!("f{i}.bin"));
        let data = net.stored_data(&row[1]).unwrap();
        assert_eq!(data, vec![i as u8; 2500 + i * 100]);
    }

    // per-file chunk order is still ascending
    let attempts = net.chunk_attempts();
    for row in &rows[1..] {
        let offs: Vec<u64> = attempts.iter().filter(|(id, _)| id == &row[1]).map(|(_, o)| *o).collect();
        assert!(offs.windows(2).all(|w| w[0] < w[1]), "{offs:?}");
    }
}

#[test]
fn reader_sees_output_as_already_uploaded() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(upload.join("a.txt"), b"a").unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "filename\na.txt\n").unwrap();
    let first = td.path().join("first.csv");
    let second = td.path().join("second.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    Pipeline::new(&wallet, &net, config(&upload)).run(&input, &first).unwrap();
    let rerun = Pipeline::new(&wallet, &net, config(&upload)).run(&first, &second).unwrap();
    assert_eq!(rerun.already_uploaded, 1);
    assert_eq!(net.headers().len(), 1);

    let rows: Vec<_> = ManifestReader::open(&second).unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(rows[0].ar_hash(), Some(net.headers()[0].id.as_str()));
}

#[test]
fn undecodable_row_is_skipped_and_written_back() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(upload.join("a.txt"), b"first").unwrap();
    fs::write(upload.join("c.txt"), b"last").unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, b"filename\na.txt\nbad\xff.txt\nc.txt\n").unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let report = Pipeline::new(&wallet, &net, config(&upload)).run(&input, &output).unwrap();
    assert_eq!(report.rows, 3);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.outcomes[1].line, 3);
    assert!(matches!(report.outcomes[1].status, RowStatus::Skipped { ref reason } if reason.contains("UTF-8")));

    let mut rdr = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(&output).unwrap();
    let rows: Vec<csv::ByteRecord> = rdr.byte_records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2].get(0), Some(&b"bad\xff.txt"[..]));
    assert_eq!(rows[2].get(1), Some(&b""[..]));
    for i in [1, 3] {
        assert!(!rows[i].get(1).unwrap().is_empty());
    }
}

#[test]
fn stray_cells_pass_through_without_becoming_an_id() {
    let td = tempfile::tempdir().unwrap();
    let upload = td.path().join("upload");
    fs::create_dir(&upload).unwrap();
    fs::write(upload.join("a.txt"), b"aaa").unwrap();
    let input = td.path().join("list.csv");
    fs::write(&input, "filename,ipfs\na.txt,QmX,stray,tail\n").unwrap();
    let output = td.path().join("out.csv");

    let wallet = Wallet::from_seed([4u8; 32]);
    let net = MemoryTransport::new();
    let report = Pipeline::new(&wallet, &net, config(&upload)).run(&input, &output).unwrap();
    assert_eq!(report.already_uploaded, 0);
    assert_eq!(report.uploaded, 1);

    let rows = read_rows(&output);
    assert_eq!(rows[0], vec!["filename", "ipfs", AR_HASH_COL]);
    assert_eq!(rows[1][..2], ["a.txt", "QmX"]);
    assert_eq!(rows[1][2], net.headers()[0].id);
    assert_eq!(rows[1][3..], ["stray", "tail"]);
}
