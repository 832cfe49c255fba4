//! `PassVault` CLI: command-line client for the `PassVault` admin API.
//!
//! A standalone HTTP client. No internal crate dependencies; everything goes
//! through the REST API with the `X-Passvault-Token` header.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const TOKEN_HEADER: &str = "X-Passvault-Token";

// ── CLI structure ────────────────────────────────────────────────────

/// PassVault: password catalog administration.
#[derive(Parser)]
#[command(
    name = "passvault",
    version,
    about = "PassVault CLI: manage throttle tracks, XML exports, and database backups",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         PASSVAULT_ADDR             Server address (default: http://127.0.0.1:8300)\n  \
         PASSVAULT_TOKEN            Admin token\n  \
         PASSVAULT_EXPORT_PASSWORD  Export password for export, verify and import\n\n\
         {DIM}Examples:{RESET}\n  \
         passvault status\n  \
         passvault tracks list --active\n  \
         passvault export --password 'correct horse'\n  \
         passvault verify passvault_export-0f3c.xml"
    ),
)]
struct Cli {
    /// PassVault server address.
    #[arg(long, env = "PASSVAULT_ADDR", default_value = "http://127.0.0.1:8300")]
    addr: String,

    /// Admin token.
    #[arg(long, env = "PASSVAULT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server health.
    Status,
    /// Tracked request attempts.
    Tracks {
        #[command(subcommand)]
        action: TrackCommands,
    },
    /// Write an XML export of the catalog.
    Export {
        /// Encrypt the export with a key derived from this password.
        #[arg(long, env = "PASSVAULT_EXPORT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Check an export file's integrity and count its nodes.
    Verify {
        /// File name inside the server's export directory.
        file: String,
        #[arg(long, env = "PASSVAULT_EXPORT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Load an export file back into the catalog.
    Import {
        /// File name inside the server's export directory.
        file: String,
        #[arg(long, env = "PASSVAULT_EXPORT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Download an export or backup file.
    Download {
        /// File name inside the server's export directory.
        file: String,
        /// Where to write it (default: the same name in the current directory).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write a JSON dump of the database.
    Backup,
}

#[derive(Subcommand)]
enum TrackCommands {
    /// List tracks, newest first.
    List {
        /// Only tracks still counting towards throttling.
        #[arg(long, default_value = "false")]
        active: bool,
        /// Only tracks for this source (e.g. `api`, `export`).
        #[arg(long)]
        source: Option<String>,
        /// Maximum number of rows.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Stop a track from counting towards throttling.
    Unlock { id: i64 },
    /// Delete a track.
    Delete { id: i64 },
    /// Delete every track.
    Clear,
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn str_field<'a>(resp: &'a Value, key: &str) -> &'a str {
    resp.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn print_counts(counts: &Value) {
    for key in ["categories", "clients", "tags", "accounts"] {
        let n = counts.get(key).and_then(Value::as_u64).unwrap_or(0);
        kv_line(key, &n.to_string());
    }
}

fn print_tracks(resp: &Value) {
    header("◷", "Tracks");
    let tracks = resp
        .get("tracks")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    if tracks.is_empty() {
        println!("  {DIM}(no tracks){RESET}");
    }
    for track in tracks {
        let id = track.get("id").and_then(Value::as_i64).unwrap_or_default();
        let state = if track.get("active").and_then(Value::as_bool) == Some(true) {
            format!("{RED}active{RESET}")
        } else {
            format!("{DIM}unlocked{RESET}")
        };
        println!(
            "  {BOLD}{id:>6}{RESET}  {:<8} {:<40} {}  {state}",
            str_field(track, "source"),
            str_field(track, "address"),
            str_field(track, "tracked_at"),
        );
    }
    println!();
}

// ── HTTP client ──────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    addr: String,
    token: Option<String>,
}

impl Client {
    fn new(addr: String, token: Option<String>) -> Self {
        let http = reqwest::Client::new();
        let addr = addr.trim_end_matches('/').to_owned();
        Self { http, addr, token }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    fn auth_header(&self) -> Result<String> {
        self.token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no token provided; set PASSVAULT_TOKEN or use --token"))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let token = self.auth_header()?;
        let resp = self
            .http
            .get(self.url(path))
            .header(TOKEN_HEADER, &token)
            .query(query)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let token = self.auth_header()?;
        let resp = self
            .http
            .get(self.url(path))
            .header(TOKEN_HEADER, &token)
            .send()
            .await
            .context("request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("server returned {status}: {body}");
        }
        Ok(resp.bytes().await.context("failed to read response body")?.to_vec())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let token = self.auth_header()?;
        let resp = self
            .http
            .post(self.url(path))
            .header(TOKEN_HEADER, &token)
            .json(body)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn post_no_body(&self, path: &str) -> Result<Value> {
        let token = self.auth_header()?;
        let resp = self
            .http
            .post(self.url(path))
            .header(TOKEN_HEADER, &token)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        let token = self.auth_header()?;
        let resp = self
            .http
            .delete(self.url(path))
            .header(TOKEN_HEADER, &token)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn get_no_auth(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = resp.text().await.context("failed to read response body")?;
    if !status.is_success() {
        bail!("server returned {status}: {body}");
    }
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

/// Reject names the server would refuse anyway, before any request is sent.
fn check_file_name(file: &str) -> Result<()> {
    if file.is_empty() || file == "." || file == ".." || file.contains(['/', '\\']) {
        bail!("'{file}' is not a plain file name; pass the name shown by `passvault export`");
    }
    Ok(())
}

fn password_body(password: Option<&str>) -> Value {
    match password.filter(|p| !p.is_empty()) {
        Some(password) => json!({ "password": password }),
        None => json!({}),
    }
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.addr, cli.token);

    match run(client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(client: Client, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Status => cmd_status(&client).await,
        Commands::Tracks { action } => cmd_tracks(&client, action).await,
        Commands::Export { password } => cmd_export(&client, password.as_deref()).await,
        Commands::Verify { file, password } => {
            cmd_verify(&client, &file, password.as_deref()).await
        }
        Commands::Import { file, password } => {
            cmd_import(&client, &file, password.as_deref()).await
        }
        Commands::Download { file, output } => {
            cmd_download(&client, &file, output.as_deref()).await
        }
        Commands::Backup => cmd_backup(&client).await,
    }
}

// ── System commands ──────────────────────────────────────────────────

async fn cmd_status(client: &Client) -> Result<()> {
    let resp = client.get_no_auth("/v1/sys/health").await?;
    println!();
    header("◉", "PassVault");
    kv_line("status", str_field(&resp, "status"));
    kv_line("version", str_field(&resp, "version"));
    kv_line("address", &client.addr);
    println!();
    Ok(())
}

async fn cmd_tracks(client: &Client, action: TrackCommands) -> Result<()> {
    match action {
        TrackCommands::List {
            active,
            source,
            limit,
        } => {
            let mut query = vec![("active", active.to_string())];
            if let Some(source) = source {
                query.push(("source", source));
            }
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            let resp = client.get("/v1/sys/tracks", &query).await?;
            println!();
            print_tracks(&resp);
        }
        TrackCommands::Unlock { id } => {
            client
                .post_no_body(&format!("/v1/sys/tracks/{id}/unlock"))
                .await?;
            success(&format!("Track {BOLD}{id}{RESET} unlocked"));
        }
        TrackCommands::Delete { id } => {
            client.delete(&format!("/v1/sys/tracks/{id}")).await?;
            success(&format!("Track {BOLD}{id}{RESET} deleted"));
        }
        TrackCommands::Clear => {
            let resp = client.post_no_body("/v1/sys/tracks/clear").await?;
            let removed = resp.get("removed").and_then(Value::as_u64).unwrap_or(0);
            success(&format!("Cleared {BOLD}{removed}{RESET} tracks"));
        }
    }
    Ok(())
}

// ── Export commands ──────────────────────────────────────────────────

async fn cmd_export(client: &Client, password: Option<&str>) -> Result<()> {
    let resp = client.post("/v1/export", &password_body(password)).await?;
    println!();
    header("⇪", "Export written");
    kv_line("file", str_field(&resp, "file"));
    let encrypted = resp.get("encrypted").and_then(Value::as_bool) == Some(true);
    kv_line("encrypted", if encrypted { "yes" } else { "no" });
    if let Some(counts) = resp.get("counts") {
        print_counts(counts);
    }
    match resp.get("archive").and_then(Value::as_str) {
        Some(archive) => kv_line("archive", archive),
        None => warning("archive copy could not be written"),
    }
    println!();
    Ok(())
}

async fn cmd_verify(client: &Client, file: &str, password: Option<&str>) -> Result<()> {
    check_file_name(file)?;
    let mut body = password_body(password);
    body["file"] = json!(file);

    let resp = client.post("/v1/export/verify", &body).await?;
    println!();
    header("✓", "Export verified");
    kv_line("file", file);
    let encrypted = resp.get("encrypted").and_then(Value::as_bool) == Some(true);
    kv_line("encrypted", if encrypted { "yes" } else { "no" });
    kv_line("version", str_field(&resp, "version"));
    if let Some(counts) = resp.get("counts") {
        print_counts(counts);
    }
    println!();
    Ok(())
}

async fn cmd_import(client: &Client, file: &str, password: Option<&str>) -> Result<()> {
    check_file_name(file)?;
    let mut body = password_body(password);
    body["file"] = json!(file);

    let resp = client.post("/v1/export/import", &body).await?;
    println!();
    header("⇩", "Export imported");
    if let Some(created) = resp.get("created") {
        println!("  {DIM}created{RESET}");
        print_counts(created);
    }
    if let Some(reused) = resp.get("reused") {
        println!("  {DIM}reused{RESET}");
        print_counts(reused);
    }
    println!();
    Ok(())
}

async fn cmd_download(client: &Client, file: &str, output: Option<&Path>) -> Result<()> {
    check_file_name(file)?;
    let bytes = client
        .get_bytes(&format!("/v1/export/files/{file}"))
        .await?;
    let target = output.map_or_else(|| PathBuf::from(file), Path::to_path_buf);
    tokio::fs::write(&target, &bytes)
        .await
        .with_context(|| format!("failed to write {}", target.display()))?;
    success(&format!(
        "Saved {BOLD}{}{RESET} ({} bytes)",
        target.display(),
        bytes.len()
    ));
    Ok(())
}

async fn cmd_backup(client: &Client) -> Result<()> {
    let resp = client.post_no_body("/v1/backup").await?;
    println!();
    header("⛁", "Backup written");
    kv_line("file", str_field(&resp, "file"));
    let tracks = resp.get("tracks").and_then(Value::as_u64).unwrap_or(0);
    kv_line("tracks", &tracks.to_string());
    if let Some(counts) = resp.get("counts") {
        print_counts(counts);
    }
    println!();
    Ok(())
}
