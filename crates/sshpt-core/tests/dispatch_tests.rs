mod common;

use common::{many_jobs, FakeTransport};
use sshpt_core::{DispatchQueue, OutputFormat, ResultSink, SessionExecutor, SinkSettings};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn file_sink(path: &Path, format: OutputFormat) -> ResultSink {
    ResultSink::start_with_console(
        SinkSettings {
            format,
            echo: false,
            outfile: Some(path.to_path_buf()),
        },
        Box::new(std::io::sink()),
    )
}

/// Split one CSV row into unescaped fields. `None` if the row is not a
/// complete, well-formed record.
fn parse_csv_row(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        if chars.next()? != '"' {
            return None;
        }
        let mut field = String::new();
        loop {
            match chars.next()? {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => break,
                c => field.push(c),
            }
        }
        fields.push(field);
        match chars.next() {
            None => return Some(fields),
            Some(',') => continue,
            Some(_) => return None,
        }
    }
}

async fn run_through_queue(
    workers: usize,
    jobs: usize,
    path: &Path,
    format: OutputFormat,
    commands: &[&str],
) -> FakeTransport {
    let transport = FakeTransport::new().with_delay(Duration::from_millis(5));
    let sink = file_sink(path, format);
    let queue = DispatchQueue::start(
        workers,
        SessionExecutor::new(Arc::new(transport.clone())),
        sink.handle(),
        CancellationToken::new(),
    );

    for job in many_jobs(jobs, commands) {
        queue.submit(job);
    }
    queue.drain().await;
    assert_eq!(queue.completed(), jobs);
    assert_eq!(queue.depth(), 0);
    queue.close();
    queue.join().await;

    sink.drain().await;
    let stats = sink.stop().await;
    assert_eq!(stats.written, jobs);
    transport
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_job_yields_exactly_one_result() {
    for workers in [1, 3, 10] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let transport =
            run_through_queue(workers, 20, &path, OutputFormat::Csv, &["echo hi"]).await;

        assert_eq!(transport.connects(), 20);
        let contents = std::fs::read_to_string(&path).unwrap();
        let hosts: Vec<String> = contents
            .lines()
            .map(|l| parse_csv_row(l).unwrap()[0].clone())
            .collect();
        assert_eq!(hosts.len(), 20, "workers = {}", workers);
        let unique: HashSet<_> = hosts.iter().collect();
        assert_eq!(unique.len(), 20, "workers = {}", workers);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_csv_rows_are_never_interleaved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    run_through_queue(10, 50, &path, OutputFormat::Csv, &["echo \"quoted\""]).await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<Vec<String>> = contents
        .lines()
        .map(|l| parse_csv_row(l).unwrap_or_else(|| panic!("malformed row: {}", l)))
        .collect();
    assert_eq!(rows.len(), 50);
    for row in rows {
        assert_eq!(row.len(), 5);
        assert_eq!(row[1], "SUCCESS");
        assert_eq!(row[3], "echo \"quoted\"");
        assert_eq!(row[4], "\"quoted\"");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_json_lines_are_never_interleaved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    run_through_queue(10, 50, &path, OutputFormat::Json, &["echo A", "echo B"]).await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut count = 0;
    for line in contents.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["connection_result"], "SUCCESS");
        assert_eq!(value["command_output"], "0: A\n1: B");
        count += 1;
    }
    assert_eq!(count, 50);
}

#[tokio::test]
async fn test_close_finishes_queued_jobs_first() {
    let transport = FakeTransport::new();
    let sink = ResultSink::start_with_console(SinkSettings::default(), Box::new(std::io::sink()));
    let queue = DispatchQueue::start(
        2,
        SessionExecutor::new(Arc::new(transport.clone())),
        sink.handle(),
        CancellationToken::new(),
    );

    for job in many_jobs(5, &["uptime"]) {
        queue.submit(job);
    }
    queue.close();
    queue.drain().await;
    let completed = queue.completed();
    queue.join().await;

    assert_eq!(completed, 5);
    assert_eq!(sink.stop().await.written, 5);
}

#[tokio::test]
async fn test_cancel_releases_idle_workers() {
    let sink = ResultSink::start_with_console(SinkSettings::default(), Box::new(std::io::sink()));
    let queue = DispatchQueue::start(
        4,
        SessionExecutor::new(Arc::new(FakeTransport::new())),
        sink.handle(),
        CancellationToken::new(),
    );

    queue.cancel();
    tokio::time::timeout(Duration::from_secs(5), queue.join())
        .await
        .expect("workers should exit after cancel");
    assert_eq!(sink.stop().await.written, 0);
}

#[tokio::test]
async fn test_wait_for_capacity_tracks_depth() {
    let sink = ResultSink::start_with_console(SinkSettings::default(), Box::new(std::io::sink()));
    let queue = DispatchQueue::start(
        2,
        SessionExecutor::new(Arc::new(FakeTransport::new())),
        sink.handle(),
        CancellationToken::new(),
    );
    assert_eq!(queue.size(), 2);

    // an empty queue always has room
    tokio::time::timeout(Duration::from_secs(1), queue.wait_for_capacity())
        .await
        .expect("capacity available");

    for job in many_jobs(6, &["uptime"]) {
        queue.submit(job);
    }
    tokio::time::timeout(Duration::from_secs(5), queue.wait_for_capacity())
        .await
        .expect("workers drain the backlog");
    assert!(queue.depth() < 2);

    queue.drain().await;
    queue.close();
    queue.join().await;
    assert_eq!(sink.stop().await.written, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_with_backlog_runs_only_in_flight_jobs() {
    let transport = FakeTransport::new().with_delay(Duration::from_millis(100));
    let sink = ResultSink::start_with_console(SinkSettings::default(), Box::new(std::io::sink()));
    let queue = DispatchQueue::start(
        2,
        SessionExecutor::new(Arc::new(transport.clone())),
        sink.handle(),
        CancellationToken::new(),
    );

    for job in many_jobs(10, &["uptime"]) {
        queue.submit(job);
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    queue.cancel();
    tokio::time::timeout(Duration::from_secs(5), queue.join())
        .await
        .expect("workers exit after their current job");

    // queued jobs never start once the queue is cancelled
    assert_eq!(transport.connects(), 2);
    assert_eq!(sink.stop().await.written, 2);
}
