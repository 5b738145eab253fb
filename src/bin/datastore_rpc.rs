//!
//! datastore RPC client
//! --------------------
//! Calls one method on a running datastore server and prints the JSON result.
//! Arguments are a JSON object given inline or read from stdin.

use std::env;
use std::io::{self, Read};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--url <base>] <method> [<json-args>]\n  {program} [--url <base>] <method> -     # read arguments from stdin\n  {program} [--url <base>] --list\n\nFlags:\n  --url <base>   Server base URL (default: $DATASTORE_URL or http://127.0.0.1:7878)\n  --list         Show the methods the server understands\n  -h, --help     Show this help\n\nExamples:\n  {program} insert '{{\"target_table\":\"T\",\"records\":[{{\"ID\":1}}],\"meta\":[[\"ID\",\"INTEGER\"]]}}'\n  {program} check_if_function_exists '{{\"function_name\":\"times_two\"}}'"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut base = env::var("DATASTORE_URL").unwrap_or_else(|_| "http://127.0.0.1:7878".to_string());
    let mut list = false;
    let mut positional: Vec<String> = Vec::new();
    let mut it = args.into_iter();
    while let Some(a) = it.next() {
        match a.as_str() {
            "--url" => base = it.next().ok_or_else(|| anyhow!("--url needs a value"))?,
            "--list" => list = true,
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            _ => positional.push(a),
        }
    }

    let base = Url::parse(&base).context("invalid base URL")?;
    let client = reqwest::Client::new();

    if list {
        let v: serde_json::Value = client.get(base.join("/rpc")?).send().await?.json().await?;
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    let Some(method) = positional.first().cloned() else {
        print_usage(&program);
        bail!("missing method");
    };
    let raw = match positional.get(1).map(String::as_str) {
        Some("-") => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s)?;
            s
        }
        Some(s) => s.to_string(),
        None => "{}".to_string(),
    };
    let body: serde_json::Value = serde_json::from_str(&raw).context("arguments must be a JSON object")?;

    let resp = client.post(base.join(&format!("/rpc/{}", method))?).json(&body).send().await?;
    let status = resp.status();
    let v: serde_json::Value = resp.json().await.context("server returned non-JSON body")?;
    println!("{}", serde_json::to_string_pretty(&v)?);
    if !status.is_success() {
        bail!("{} failed: HTTP {}", method, status);
    }
    Ok(())
}
