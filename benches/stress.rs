use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("atrium")
        .password("atrium");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Disjoint one-hour intervals: slot i lands on day i/8, hour 9 + i%8.
fn interval(i: usize) -> (String, String) {
    let base = chrono::NaiveDate::from_ymd_opt(2031, 1, 1).unwrap();
    let start = (base + chrono::TimeDelta::days((i / 8) as i64))
        .and_hms_opt(9 + (i % 8) as u32, 0, 0)
        .unwrap()
        .and_utc();
    let end = start + chrono::TimeDelta::hours(1);
    (
        start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    )
}

fn insert_reservation_sql(fid: Ulid, start: &str, end: &str) -> String {
    let rid = Ulid::new();
    format!(
        r#"INSERT INTO reservations (id, facility_id, name, email, phone, title, description, start, "end")
           VALUES ('{rid}', '{fid}', 'Bench Bot', 'bench@example.com', NULL, 'Load test', NULL, '{start}', '{end}')"#
    )
}

async fn create_facility(client: &tokio_postgres::Client) -> Ulid {
    let fid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO facilities (id, name, hourly_rate) VALUES ('{fid}', 'Bench Hall', 20.0)"
        ))
        .await
        .unwrap();
    fid
}

async fn phase1_sequential_writes(host: &str, port: u16) {
    let client = connect(host, port).await;
    let fid = create_facility(&client).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (s, e) = interval(i);
        let t = Instant::now();
        client
            .batch_execute(&insert_reservation_sql(fid, &s, &e))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} reservations in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_writes(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task gets its own tenant (unique dbname from connect())
            let client = connect(&host, port).await;
            let fid = create_facility(&client).await;
            for j in 0..n_per_task {
                let (s, e) = interval(j);
                client
                    .batch_execute(&insert_reservation_sql(fid, &s, &e))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_availability_reads_under_load(host: &str, port: u16) {
    let client = connect(host, port).await;
    let fid = create_facility(&client).await;

    // Seed a busy calendar month.
    for i in 0..200 {
        let (s, e) = interval(i);
        client
            .batch_execute(&insert_reservation_sql(fid, &s, &e))
            .await
            .unwrap();
    }

    // Writer task keeps appending while we measure reads.
    let writer_host = host.to_string();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port).await;
        let fid = create_facility(&client).await;
        for i in 0..1000 {
            let (s, e) = interval(i);
            if client
                .batch_execute(&insert_reservation_sql(fid, &s, &e))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let day = 1 + (i % 28);
        let t = Instant::now();
        let rows = client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE facility_id = '{fid}' AND date = '2031-01-{day:02}'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
        assert!(!rows.is_empty());
    }
    print_latency("availability read latency", &mut latencies);

    writer.abort();
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ATRIUM_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ATRIUM_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ATRIUM_PORT");

    println!("=== atrium stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential_writes(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent_writes(&host, port).await;

    println!("\n[phase 3] availability reads under write load");
    phase3_availability_reads_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
