//! Interactive client shell.
//!
//! A line of input holds one or more commands. Every term starting with `.`
//! is a command; upload, download and remove take the next term as their
//! file name, and connect optionally takes a server address.

use crate::config::ClientSettings;
use crate::error::ProtocolError;
use crate::progress::{failure, format_size, heading, success, BarProgress};
use crate::protocol::{Command, COMMAND_SENTINEL};
use crate::transfer::client::{Client, DownloadOutcome, RemoveOutcome, UploadOutcome};
use crate::transfer::Confirm;
use crate::url::{parse_remote, Remote};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect(Option<String>),
    Upload(String),
    Download(String),
    List,
    Remove(String),
    Disconnect,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIssue {
    Unknown(String),
    MissingFile(Command),
}

/// Split a line into requests, in order. Terms that are neither commands nor
/// consumed as arguments are ignored.
pub fn parse_line(line: &str) -> Vec<Result<Request, ParseIssue>> {
    let mut out = Vec::new();
    let mut terms = line.split_whitespace().peekable();
    while let Some(term) = terms.next() {
        if !term.starts_with(COMMAND_SENTINEL) {
            continue;
        }
        let Some(cmd) = Command::from_token(term) else {
            out.push(Err(ParseIssue::Unknown(term.to_string())));
            continue;
        };
        let req = match cmd {
            Command::Connect => {
                let addr = terms
                    .next_if(|t| !t.starts_with(COMMAND_SENTINEL))
                    .map(str::to_string);
                Ok(Request::Connect(addr))
            }
            Command::Upload | Command::Download | Command::Remove => match terms.next() {
                Some(file) => Ok(match cmd {
                    Command::Upload => Request::Upload(file.to_string()),
                    Command::Download => Request::Download(file.to_string()),
                    _ => Request::Remove(file.to_string()),
                }),
                None => Err(ParseIssue::MissingFile(cmd)),
            },
            Command::List => Ok(Request::List),
            Command::Disconnect => Ok(Request::Disconnect),
            Command::Exit => Ok(Request::Exit),
        };
        out.push(req);
    }
    out
}

/// The command manual shown at startup
pub fn menu() -> String {
    let rows: Vec<String> = Command::ALL
        .iter()
        .map(|c| {
            let usage = if c.takes_file() {
                format!("{} FILE", c.token())
            } else if *c == Command::Connect {
                format!("{} [HOST:PORT]", c.token())
            } else {
                c.token().to_string()
            };
            let what = match c {
                Command::Connect => "connect to server",
                Command::Upload => "upload a file",
                Command::Download => "download a file",
                Command::List => "list files on the server",
                Command::Remove => "remove a file from the server",
                Command::Disconnect => "disconnect",
                Command::Exit => "exit",
            };
            format!("  {:<18} {}", usage, what)
        })
        .collect();
    format!("\n  commands manual\n  {}\n{}", "-".repeat(48), rows.join("\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

/// Asks on the terminal; only y, yes, n or no are accepted.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, name: &str) -> bool {
        let stdin = io::stdin();
        loop {
            print!("remove {}? y [yes] / n [no]: ", name);
            let _ = io::stdout().flush();
            let mut answer = String::new();
            match stdin.lock().read_line(&mut answer) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => continue,
            }
        }
    }
}

pub struct Shell {
    settings: ClientSettings,
    client: Option<Client<TcpStream>>,
    remote: Option<Remote>,
    confirmer: Box<dyn Confirm>,
}

impl Shell {
    pub fn new(settings: ClientSettings, confirmer: Box<dyn Confirm>) -> Self {
        Self {
            settings,
            client: None,
            remote: None,
            confirmer,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Run every command on the line, stopping after a disconnect or exit.
    pub async fn execute(&mut self, line: &str) -> Control {
        for parsed in parse_line(line) {
            let req = match parsed {
                Ok(r) => r,
                Err(ParseIssue::Unknown(t)) => {
                    println!("{}", failure(&format!("command not recognised: {}", t)));
                    continue;
                }
                Err(ParseIssue::MissingFile(c)) => {
                    println!("{}", failure(&format!("{} needs a file name", c.token())));
                    continue;
                }
            };
            match req {
                Request::Connect(addr) => self.connect(addr.as_deref()).await,
                Request::Disconnect => {
                    println!("{}", heading("disconnect"));
                    self.disconnect().await;
                    break;
                }
                Request::Exit => {
                    self.disconnect().await;
                    println!("bye bye!");
                    return Control::Exit;
                }
                other => self.run(other).await,
            }
        }
        Control::Continue
    }

    async fn connect(&mut self, addr: Option<&str>) {
        println!("{}", heading("connection"));
        if let (Some(_), Some(remote)) = (&self.client, &self.remote) {
            println!("already connected to {}", remote);
            return;
        }
        let remote = match addr {
            Some(a) => match parse_remote(a) {
                Some(r) => r,
                None => {
                    println!("{}", failure(&format!("not a server address: {}", a)));
                    return;
                }
            },
            None => self.settings.remote.clone(),
        };
        match Client::connect(
            &remote.addr(),
            self.settings.buffer_size,
            self.settings.download_dir.clone(),
        )
        .await
        {
            Ok(client) => {
                println!("{}", success(&format!("connected to {}", remote)));
                println!("downloads go to {}", client.local_dir().display());
                self.client = Some(client);
                self.remote = Some(remote);
            }
            Err(e) => {
                warn!(remote = %remote, error = %e, "connect failed");
                println!(
                    "{}",
                    failure(&format!(
                        "connection to {} unsuccessful ({}). Make sure the server is online.",
                        remote, e
                    ))
                );
            }
        }
    }

    async fn disconnect(&mut self) {
        match self.client.take() {
            Some(client) => {
                if let Err(e) = client.disconnect().await {
                    debug!(error = %e, "disconnect");
                }
                self.remote = None;
                println!("you are now disconnected");
            }
            None => println!("not connected"),
        }
    }

    async fn run(&mut self, req: Request) {
        let title = match &req {
            Request::Upload(_) => "upload",
            Request::Download(_) => "download",
            Request::List => "list files",
            Request::Remove(_) => "remove",
            _ => "",
        };
        println!("{}", heading(title));
        let Some(client) = self.client.as_mut() else {
            println!("{}", failure("not connected; use .$ to connect first"));
            return;
        };
        let result = match req {
            Request::Upload(path) => upload(client, &path).await,
            Request::Download(name) => download(client, &name).await,
            Request::List => list(client).await,
            Request::Remove(name) => remove(client, &name, self.confirmer.as_mut()).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            println!("{}", failure(&e.to_string()));
            if e.is_fatal() {
                warn!(error = %e, "dropping connection");
                self.client = None;
                self.remote = None;
                println!("connection dropped; use .$ to reconnect");
            }
        }
    }
}

async fn upload(client: &mut Client<TcpStream>, path: &str) -> Result<(), ProtocolError> {
    println!("uploading {}", path);
    let mut bar = BarProgress::new();
    match client.upload(Path::new(path), &mut bar).await? {
        UploadOutcome::Stored {
            name,
            bytes,
            chunks,
            elapsed,
        } => println!(
            "{}",
            success(&format!(
                "sent {}: {} in {} chunks, {:.2}s",
                name,
                format_size(bytes),
                chunks,
                elapsed
            ))
        ),
        UploadOutcome::NotStored { name, .. } => {
            println!("{}", failure(&format!("server could not store {}", name)))
        }
    }
    Ok(())
}

async fn download(client: &mut Client<TcpStream>, name: &str) -> Result<(), ProtocolError> {
    println!("downloading {}", name);
    let mut bar = BarProgress::new();
    match client.download(name, &mut bar).await? {
        DownloadOutcome::Downloaded {
            path,
            bytes,
            elapsed,
            ..
        } => println!(
            "{}",
            success(&format!(
                "saved {}: {} in {:.2}s",
                path.display(),
                format_size(bytes),
                elapsed
            ))
        ),
        DownloadOutcome::NotFound { name } => println!(
            "{}",
            failure(&format!(
                "{} does not exist on the server. Make sure the name was entered correctly",
                name
            ))
        ),
        DownloadOutcome::LocalWriteFailed { path, reason, .. } => println!(
            "{}",
            failure(&format!("could not write {}: {}", path.display(), reason))
        ),
    }
    Ok(())
}

async fn list(client: &mut Client<TcpStream>) -> Result<(), ProtocolError> {
    let listing = client.list().await?;
    println!("  {:>14} | file name", "file size");
    println!("  {}|{}", "-".repeat(15), "-".repeat(40));
    for entry in &listing.entries {
        println!("  {:>14} | {}", format_size(entry.size), entry.name);
    }
    println!("total files: {}", listing.entries.len());
    println!("total directory size: {}", format_size(listing.total));
    Ok(())
}

async fn remove(
    client: &mut Client<TcpStream>,
    name: &str,
    confirmer: &mut dyn Confirm,
) -> Result<(), ProtocolError> {
    match client.remove(name, confirmer).await? {
        RemoveOutcome::Removed { name } => {
            println!("{}", success(&format!("{} removed", name)))
        }
        RemoveOutcome::NotFound { name } => {
            println!("{}", failure(&format!("{} does not exist on the server", name)))
        }
        RemoveOutcome::Declined { name } => println!("kept {}", name),
        RemoveOutcome::Failed { name } => {
            println!("{}", failure(&format!("server failed to remove {}", name)))
        }
    }
    Ok(())
}
