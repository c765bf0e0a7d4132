use chrono::DateTime;
use tempfile::TempDir;

use sifpod::sifpod::engine::log::write_cri_logs;

#[tokio::test]
async fn lines_are_stamped_and_tagged() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("pods/web_0.log");

    let stdout: &[u8] = b"first line\nsecond line\n";
    let stderr: &[u8] = b"";
    write_cri_logs(stdout, stderr, &log_path).await.unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    for (line, expected) in lines.iter().zip(["first line", "second line"]) {
        let mut parts = line.splitn(4, ' ');
        let ts = parts.next().unwrap();
        DateTime::parse_from_rfc3339(ts).expect("RFC 3339 timestamp");
        assert!(ts.contains('.'), "nanosecond precision expected: {}", ts);
        assert_eq!(parts.next(), Some("stdout"));
        assert_eq!(parts.next(), Some("F"));
        assert_eq!(parts.next(), Some(expected));
    }
}

#[tokio::test]
async fn stderr_is_tagged_separately() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("web_0.log");

    let stdout: &[u8] = b"";
    let stderr: &[u8] = b"boom\n";
    write_cri_logs(stdout, stderr, &log_path).await.unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.contains(" stderr F boom"), "{}", contents);
}

#[tokio::test]
async fn appends_to_an_existing_log() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("web_0.log");

    let first: &[u8] = b"one\n";
    let empty: &[u8] = b"";
    write_cri_logs(first, empty, &log_path).await.unwrap();

    let second: &[u8] = b"two\n";
    write_cri_logs(second, empty, &log_path).await.unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.lines().all(|l| l.contains(" stdout F ")));
}
