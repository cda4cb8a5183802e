// demos/basic.rs
//
// EDGEDB_PASSWORD=secret cargo run --example basic

use edgewire::{ConnectConfig, Pool, QueryRequest, TlsConfig, TlsSecurity};

fn env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = env("EDGEDB_HOST", "127.0.0.1");
    let port: u16 = env("EDGEDB_PORT", "5656").parse()?;
    let user = env("EDGEDB_USER", "edgedb");
    let password = env("EDGEDB_PASSWORD", "");
    let database = env("EDGEDB_DATABASE", "edgedb");

    let cfg = ConnectConfig {
        host,
        port,
        user,
        password,
        database,
        tls: TlsConfig {
            // Local development instances use self-signed certificates.
            security: TlsSecurity::Insecure,
            ca_pem_path: None,
            sni_hostname: None,
        },
        pool_size: 4,
        ..Default::default()
    };

    let pool = Pool::new(cfg);

    let greeting: String = pool
        .query_required_single(&QueryRequest::new("select 'hello from edgewire'"))
        .await?;
    println!("{greeting}");

    let sums: Vec<i64> = pool
        .query_as(
            &QueryRequest::new("select <int64>$x + <int64>$y")
                .argument("x", 2i64)
                .argument("y", 3i64),
        )
        .await?;
    println!("2 + 3 = {:?}", sums);

    let count: i64 = pool
        .transaction(|tx| async move {
            tx.query_required_single(&QueryRequest::new("select count(schema::Module)"))
                .await
        })
        .await?;
    println!("{count} modules");

    pool.close().await;
    Ok(())
}
