use std::process::Command;
use tempfile::tempdir;

// Writes a ZIP using the library and then calls `unzip -t` to verify
// compatibility with a real-world extractor. Skipped if `unzip` isn't on
// the system running the tests.

#[test]
fn unzip_compatibility() {
    use zipcat::{CompressionMethod, OpenOptions, ZipArchive};

    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    {
        let mut archive = ZipArchive::create(&zip_path, OpenOptions::new()).unwrap();
        archive
            .start_entry(
                "hello.txt",
                (2024, 1, 1, 0, 0, 0),
                CompressionMethod::Deflated,
                6,
                false,
            )
            .unwrap();
        archive.write_data(b"hello from test").unwrap();
        archive.finish_entry().unwrap();

        archive
            .start_entry(
                "big.bin",
                (2024, 1, 1, 0, 0, 0),
                CompressionMethod::Deflated,
                6,
                false,
            )
            .unwrap();
        for _ in 0..1024 {
            archive.write_data(&vec![0u8; 1024]).unwrap();
        }
        archive.finish_entry().unwrap();

        archive.close().unwrap();
    }

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
}
